use prost::{Message, bytes::BytesMut};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, format_description};

use crate::communicator_objects::UnityMessageProto;

/// Length-delimited log of every message exchanged with one simulator.
pub struct TranscriptFile {
    file: File,
    path: PathBuf,
}

impl TranscriptFile {
    pub fn new(folder: &Path, env_name: &str, worker_id: u16) -> io::Result<Self> {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let format = format_description::parse("[year][month][day]-[hour][minute][second]")
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let date_time_str = now
            .format(&format)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let label = env_name.replace(['/', '\\'], "_");
        let path = folder.join(format!(
            "{} - {} - worker{}.mlx",
            label, date_time_str, worker_id
        ));

        if !folder.exists() {
            std::fs::create_dir_all(folder)?;
        }

        let file = File::create(&path)?;
        Ok(TranscriptFile { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, message: &UnityMessageProto) -> io::Result<()> {
        let mut buf = Vec::new();
        message.encode(&mut buf)?;

        let mut varint_buf = BytesMut::new();
        prost::encode_length_delimiter(buf.len(), &mut varint_buf)?;

        self.file.write_all(&varint_buf)?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Reads back a transcript written by [`TranscriptFile`].
pub fn read_transcript(path: &Path) -> io::Result<Vec<UnityMessageProto>> {
    let data = std::fs::read(path)?;
    let mut remaining = data.as_slice();
    let mut messages = Vec::new();
    while !remaining.is_empty() {
        let message = UnityMessageProto::decode_length_delimited(&mut remaining)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        messages.push(message);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator_objects::HeaderProto;

    #[test]
    fn test_transcript_keeps_message_order() {
        let folder = std::env::temp_dir().join(format!("aquanav-transcript-{}", std::process::id()));
        let mut transcript =
            TranscriptFile::new(&folder, "aquatic_navigation_gym/EasyUuvEnv-v0", 3).unwrap();
        assert!(
            transcript
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("aquatic_navigation_gym_EasyUuvEnv-v0 - ")
        );

        for status in [200, 400] {
            let message = UnityMessageProto {
                header: Some(HeaderProto {
                    status,
                    message: String::new(),
                }),
                ..Default::default()
            };
            transcript.record(&message).unwrap();
        }

        let messages = read_transcript(transcript.path()).unwrap();
        let statuses: Vec<i32> = messages
            .iter()
            .map(|m| m.header.as_ref().unwrap().status)
            .collect();
        assert_eq!(statuses, vec![200, 400]);
        std::fs::remove_dir_all(&folder).unwrap();
    }
}
