//! End-to-end runs against an in-process stand-in for the Unity player.

use std::time::Duration;

use aquanav::channels::{ENGINE_CHANNEL_ID, ENVIRONMENT_PARAMETERS_CHANNEL_ID, IncomingMessage};
use aquanav::communicator_objects::observation_proto::{FloatData, ObservationData};
use aquanav::communicator_objects::unity_rl_output_proto::ListAgentInfoProto;
use aquanav::communicator_objects::unity_to_external_proto_client::UnityToExternalProtoClient;
use aquanav::communicator_objects::{
    ActionSpecProto, AgentInfoProto, BrainParametersProto, CommandProto, HeaderProto,
    ObservationProto, UnityInputProto, UnityMessageProto, UnityOutputProto,
    UnityRlInitializationOutputProto, UnityRlInputProto, UnityRlOutputProto,
};
use aquanav::env::{Action, Space};
use aquanav::infra::WorkerIdAllocator;
use aquanav::{EnvError, EnvFactory, Environment, LaunchFailure, LaunchSettings, ScenarioVariant};
use tonic::transport::Channel;
use uuid::Uuid;

const BEHAVIOR: &str = "SafeRLAUV?team=0";

struct FakeSimulator {
    port: u16,
    version: &'static str,
    episode_length: usize,
}

fn output_message(output: UnityOutputProto) -> UnityMessageProto {
    UnityMessageProto {
        header: Some(HeaderProto {
            status: 200,
            message: String::new(),
        }),
        unity_output: Some(output),
        unity_input: None,
    }
}

fn observation(values: Vec<f32>) -> ObservationProto {
    ObservationProto {
        shape: vec![values.len() as i32],
        observation_data: Some(ObservationData::FloatData(FloatData { data: values })),
        name: "VectorSensor".to_string(),
        ..Default::default()
    }
}

fn agent_output(step: usize, done: bool, with_spec: bool) -> UnityOutputProto {
    let agent = AgentInfoProto {
        id: 7,
        reward: if done { 1.0 } else { 0.25 },
        done,
        observations: vec![observation(vec![step as f32; 5]), observation(vec![1.0, 2.0, 3.0])],
        ..Default::default()
    };
    let mut rl_output = UnityRlOutputProto::default();
    rl_output
        .agent_infos
        .insert(BEHAVIOR.to_string(), ListAgentInfoProto { value: vec![agent] });

    let rl_initialization_output = with_spec.then(|| UnityRlInitializationOutputProto {
        brain_parameters: vec![BrainParametersProto {
            brain_name: BEHAVIOR.to_string(),
            is_training: true,
            action_spec: Some(ActionSpecProto {
                num_continuous_actions: 0,
                num_discrete_actions: 3,
                discrete_branch_sizes: vec![3, 3, 2],
                action_descriptions: Vec::new(),
            }),
        }],
        ..Default::default()
    });

    UnityOutputProto {
        rl_output: Some(rl_output),
        rl_initialization_output,
    }
}

async fn connect(port: u16) -> UnityToExternalProtoClient<Channel> {
    for _ in 0..200 {
        if let Ok(client) =
            UnityToExternalProtoClient::connect(format!("http://127.0.0.1:{}", port)).await
        {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("trainer never listened on port {}", port);
}

impl FakeSimulator {
    /// Plays the player side until the trainer closes; returns every reply.
    async fn run(self) -> Vec<UnityMessageProto> {
        let mut client = connect(self.port).await;
        let mut replies = Vec::new();

        let init = output_message(UnityOutputProto {
            rl_output: None,
            rl_initialization_output: Some(UnityRlInitializationOutputProto {
                name: "AcademySingleton".to_string(),
                communication_version: self.version.to_string(),
                package_version: "2.0.1".to_string(),
                ..Default::default()
            }),
        });
        let mut next = init;
        let mut step = 0;
        let mut sent_spec = false;

        loop {
            let reply = match client.exchange(next).await {
                Ok(reply) => reply.into_inner(),
                Err(_) => break,
            };
            replies.push(reply.clone());

            let status = reply.header.as_ref().map(|h| h.status).unwrap_or(200);
            if status != 200 {
                break;
            }
            let Some(input) = reply.unity_input else {
                break;
            };

            next = match input.rl_input {
                None => output_message(UnityOutputProto::default()),
                Some(rl_input) if rl_input.command == CommandProto::Reset as i32 => {
                    step = 0;
                    let output = agent_output(step, false, !sent_spec);
                    sent_spec = true;
                    output_message(output)
                }
                Some(_) => {
                    step += 1;
                    output_message(agent_output(step, step >= self.episode_length, false))
                }
            };
        }
        replies
    }
}

fn rl_inputs(replies: &[UnityMessageProto]) -> Vec<&UnityRlInputProto> {
    replies
        .iter()
        .filter_map(|r| r.unity_input.as_ref())
        .filter_map(|input: &UnityInputProto| input.rl_input.as_ref())
        .collect()
}

/// Splits side-channel bytes into (channel, payload) frames.
fn frames(mut data: &[u8]) -> Vec<(Uuid, Vec<u8>)> {
    let mut result = Vec::new();
    while !data.is_empty() {
        let mut id = [0u8; 16];
        id.copy_from_slice(&data[..16]);
        let len = i32::from_le_bytes(data[16..20].try_into().unwrap()) as usize;
        result.push((Uuid::from_bytes_le(id), data[20..20 + len].to_vec()));
        data = &data[20 + len..];
    }
    result
}

fn editor_factory(base_port: u16, timeout: Duration) -> EnvFactory {
    EnvFactory::with_allocator(
        LaunchSettings {
            base_port,
            timeout_wait: timeout,
            editor: true,
            seed: 11,
            ..Default::default()
        },
        WorkerIdAllocator::new(16),
    )
}

#[tokio::test]
async fn test_episode_against_fake_simulator() {
    let factory = editor_factory(48_200, Duration::from_secs(10));
    let simulator = tokio::spawn(
        FakeSimulator {
            port: 48_200,
            version: "1.5.0",
            episode_length: 2,
        }
        .run(),
    );

    let mut env = factory.make(ScenarioVariant::Easy).await.unwrap();
    assert_eq!(env.worker_id(), 0);
    assert_eq!(env.action_space(), &Space::Discrete { n: 18 });
    assert_eq!(env.observation_space().size(), 8);

    let first = env.step(&Action::Discrete(17)).await.unwrap();
    assert!(!first.done);
    assert_eq!(first.observation[..5], [1.0; 5]);
    assert_eq!(first.info.steps, 1);
    assert_eq!(first.info.agent_id, 7);

    let last = env.step(&Action::Discrete(4)).await.unwrap();
    assert!(last.done);
    assert!(!last.info.interrupted);
    assert!((last.reward - 1.0).abs() < 1e-6);

    assert!(matches!(
        env.step(&Action::Discrete(0)).await,
        Err(EnvError::EpisodeFinished)
    ));
    assert!(matches!(
        env.step(&Action::Discrete(18)).await,
        Err(EnvError::EpisodeFinished)
    ));

    env.close().await.unwrap();
    assert!(matches!(
        env.step(&Action::Discrete(0)).await,
        Err(EnvError::ClosedHandle)
    ));
    assert!(matches!(env.reset().await, Err(EnvError::ClosedHandle)));
    assert_eq!(factory.allocator().in_use(), 0);

    let replies = simulator.await.unwrap();

    let init = replies[0]
        .unity_input
        .as_ref()
        .and_then(|i| i.rl_initialization_input.as_ref())
        .unwrap();
    assert_eq!(init.seed, 11);
    assert_eq!(init.communication_version, "1.5.0");
    assert_eq!(init.num_areas, 1);

    let inputs = rl_inputs(&replies);
    assert_eq!(inputs[0].command, CommandProto::Reset as i32);
    assert_eq!(inputs[1].command, CommandProto::Step as i32);
    let actions = &inputs[1].agent_actions[BEHAVIOR].value;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].discrete_actions, vec![2, 2, 1]);
    assert_eq!(inputs[2].agent_actions[BEHAVIOR].value[0].discrete_actions, vec![0, 2, 0]);

    let sent = frames(&inputs[0].side_channel);
    let engine: Vec<_> = sent.iter().filter(|(id, _)| *id == ENGINE_CHANNEL_ID).collect();
    let params: Vec<_> = sent
        .iter()
        .filter(|(id, _)| *id == ENVIRONMENT_PARAMETERS_CHANNEL_ID)
        .collect();
    assert_eq!(engine.len(), 4);
    assert_eq!(params.len(), 7);

    let mut target_x = IncomingMessage::new(params[0].1.clone());
    assert_eq!(target_x.read_string().unwrap(), "target_x");
    assert_eq!(target_x.read_i32().unwrap(), 0);
    assert!((target_x.read_f32().unwrap() - 33.66).abs() < 1e-4);

    // Payloads go out once, with the first reset only.
    assert!(inputs[1].side_channel.is_empty());

    let closing = replies.last().unwrap();
    assert_eq!(closing.header.as_ref().unwrap().status, 400);
}

#[tokio::test]
async fn test_concurrent_envs_get_distinct_workers() {
    let factory = editor_factory(48_300, Duration::from_secs(10));
    let first_sim = tokio::spawn(
        FakeSimulator {
            port: 48_300,
            version: "1.5.0",
            episode_length: 5,
        }
        .run(),
    );
    let second_sim = tokio::spawn(
        FakeSimulator {
            port: 48_301,
            version: "1.5.0",
            episode_length: 5,
        }
        .run(),
    );

    let (first, second) = tokio::join!(
        factory.make_with_worker(ScenarioVariant::Medium, 0),
        factory.make_with_worker(ScenarioVariant::Hard, 1)
    );
    let mut first = first.unwrap();
    let mut second = second.unwrap();
    assert_ne!(first.worker_id(), second.worker_id());

    let collision = factory.make_with_worker(ScenarioVariant::Medium, 1).await;
    assert!(matches!(
        collision,
        Err(EnvError::Launch(LaunchFailure::WorkerInUse { worker_id: 1 }))
    ));

    first.close().await.unwrap();
    second.close().await.unwrap();
    assert_eq!(factory.allocator().in_use(), 0);
    first_sim.await.unwrap();
    second_sim.await.unwrap();
}

#[tokio::test]
async fn test_incompatible_simulator_is_rejected() {
    let factory = editor_factory(48_400, Duration::from_secs(10));
    let simulator = tokio::spawn(
        FakeSimulator {
            port: 48_400,
            version: "2.0.0",
            episode_length: 1,
        }
        .run(),
    );

    let result = factory.make(ScenarioVariant::First).await;
    assert!(matches!(
        result,
        Err(EnvError::Launch(LaunchFailure::Incompatible { .. }))
    ));
    assert_eq!(factory.allocator().in_use(), 0);

    let replies = simulator.await.unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.as_ref().unwrap().status, 400);
}

#[tokio::test]
async fn test_silent_simulator_times_out() {
    let factory = editor_factory(48_500, Duration::from_millis(200));
    let result = factory.make(ScenarioVariant::Third).await;
    assert!(matches!(
        result,
        Err(EnvError::Launch(LaunchFailure::HandshakeTimeout { .. }))
    ));
    assert_eq!(factory.allocator().in_use(), 0);
}

/// Writes `body` as the Easy scenario's player script under a fresh builds dir.
#[cfg(unix)]
fn scripted_build(name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let builds = std::env::temp_dir().join(format!("aquanav-{}-{}", name, std::process::id()));
    let build_dir = builds.join("EasyEnv");
    std::fs::create_dir_all(&build_dir).unwrap();
    let script = build_dir.join("SafeRLAUV.x86_64");
    std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    builds
}

#[cfg(unix)]
fn spawning_factory(
    builds_dir: std::path::PathBuf,
    base_port: u16,
    timeout: Duration,
) -> EnvFactory {
    EnvFactory::with_allocator(
        LaunchSettings {
            builds_dir,
            base_port,
            timeout_wait: timeout,
            editor: false,
            seed: 11,
            ..Default::default()
        },
        WorkerIdAllocator::new(16),
    )
}

#[cfg(unix)]
#[tokio::test]
async fn test_hung_player_is_killed_on_timeout() {
    let builds = scripted_build("hung", "echo $$ > \"$(dirname \"$0\")/pid\"\nexec sleep 30");
    let factory = spawning_factory(builds.clone(), 48_600, Duration::from_secs(1));

    let result = factory.make(ScenarioVariant::Easy).await;
    assert!(matches!(
        result,
        Err(EnvError::Launch(LaunchFailure::HandshakeTimeout { .. }))
    ));
    assert_eq!(factory.allocator().in_use(), 0);

    let pid = std::fs::read_to_string(builds.join("EasyEnv").join("pid")).unwrap();
    let alive = std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {}", pid.trim()))
        .status()
        .unwrap();
    assert!(!alive.success(), "player {} still running", pid.trim());

    std::fs::remove_dir_all(builds).ok();
}

#[cfg(unix)]
#[tokio::test]
async fn test_player_exit_during_launch() {
    let builds = scripted_build("exits", "exit 3");
    let factory = spawning_factory(builds.clone(), 48_700, Duration::from_secs(10));

    let result = factory.make(ScenarioVariant::Easy).await;
    match result {
        Err(EnvError::Launch(LaunchFailure::ProcessExited { status })) => {
            assert_eq!(status.code(), Some(3));
        }
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert_eq!(factory.allocator().in_use(), 0);

    std::fs::remove_dir_all(builds).ok();
}
