use crate::error::{EnvError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete { n: usize },
    MultiDiscrete { nvec: Vec<usize> },
    /// Box space: every component within `[low, high]`.
    Continuous { low: f32, high: f32, shape: Vec<usize> },
}

impl Space {
    pub fn vector(size: usize) -> Self {
        Space::Continuous {
            low: f32::NEG_INFINITY,
            high: f32::INFINITY,
            shape: vec![size],
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Space::Discrete { .. } => 1,
            Space::MultiDiscrete { nvec } => nvec.len(),
            Space::Continuous { shape, .. } => shape.iter().product(),
        }
    }

    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (Space::Discrete { n }, Action::Discrete(value)) => value < n,
            (Space::MultiDiscrete { nvec }, Action::MultiDiscrete(values)) => {
                values.len() == nvec.len() && values.iter().zip(nvec).all(|(v, n)| v < n)
            }
            (Space::Continuous { low, high, shape }, Action::Continuous(values)) => {
                values.len() == shape.iter().product::<usize>()
                    && values.iter().all(|v| *v >= *low && *v <= *high)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Discrete(usize),
    MultiDiscrete(Vec<usize>),
    Continuous(Vec<f32>),
}

/// Maps a multi-branch discrete space onto a single discrete index.
///
/// Index `i` enumerates the cartesian product of the branches with the last
/// branch varying fastest, so for branches `[2, 3]` index 4 is `[1, 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFlattener {
    branches: Vec<usize>,
}

impl ActionFlattener {
    pub fn new(branches: Vec<usize>) -> Result<Self> {
        if branches.is_empty() || branches.contains(&0) {
            return Err(EnvError::protocol(format!(
                "cannot flatten discrete branches {:?}",
                branches
            )));
        }
        branches
            .iter()
            .try_fold(1usize, |acc, &b| acc.checked_mul(b))
            .ok_or_else(|| EnvError::protocol("flattened action space overflows"))?;
        Ok(Self { branches })
    }

    pub fn len(&self) -> usize {
        self.branches.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn action_space(&self) -> Space {
        Space::Discrete { n: self.len() }
    }

    pub fn lookup(&self, index: usize) -> Result<Vec<i32>> {
        if index >= self.len() {
            return Err(EnvError::invalid_action(format!(
                "action {} outside flattened space of {}",
                index,
                self.len()
            )));
        }
        let mut rest = index;
        let mut action = vec![0i32; self.branches.len()];
        for (slot, &branch) in action.iter_mut().zip(&self.branches).rev() {
            *slot = (rest % branch) as i32;
            rest /= branch;
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattener_ordering() {
        let flattener = ActionFlattener::new(vec![2, 3]).unwrap();
        assert_eq!(flattener.len(), 6);
        let all: Vec<Vec<i32>> = (0..6).map(|i| flattener.lookup(i).unwrap()).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn test_flattener_out_of_range() {
        let flattener = ActionFlattener::new(vec![3, 3, 2]).unwrap();
        assert_eq!(flattener.action_space(), Space::Discrete { n: 18 });
        assert_eq!(flattener.lookup(17).unwrap(), vec![2, 2, 1]);
        assert!(matches!(
            flattener.lookup(18),
            Err(EnvError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_flattener_rejects_empty_branch() {
        assert!(ActionFlattener::new(vec![3, 0]).is_err());
        assert!(ActionFlattener::new(Vec::new()).is_err());
    }

    #[test]
    fn test_space_contains() {
        assert!(Space::Discrete { n: 4 }.contains(&Action::Discrete(3)));
        assert!(!Space::Discrete { n: 4 }.contains(&Action::Discrete(4)));

        let boxed = Space::Continuous {
            low: -1.0,
            high: 1.0,
            shape: vec![2],
        };
        assert!(boxed.contains(&Action::Continuous(vec![0.5, -1.0])));
        assert!(!boxed.contains(&Action::Continuous(vec![1.5, 0.0])));
        assert!(!boxed.contains(&Action::Discrete(0)));
    }
}
