//! NMEA log replay
//!
//! Feeds a recorded NMEA capture through the same pipeline as a live
//! receiver. Enables offline testing, backfilling sinks, and bug reproduction.

use super::transport::{LineSource, PortOpener, TransportError};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Line source over any buffered reader
pub struct ReplaySource<R> {
    reader: R,
    label: String,
    lines_read: u64,
}

impl ReplaySource<BufReader<File>> {
    /// Open a recorded log file
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

impl<R: BufRead + Send> ReplaySource<R> {
    /// Wrap a reader
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
            lines_read: 0,
        }
    }

    /// Number of lines handed out so far
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl<R: BufRead + Send> LineSource for ReplaySource<R> {
    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        match self.reader.read_line(&mut line)? {
            0 => Err(TransportError::EndOfStream),
            _ => {
                self.lines_read += 1;
                Ok(line.trim_end_matches(['\r', '\n']).to_string())
            }
        }
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.label)
    }
}

/// Scripted source yielding a fixed sequence of read results.
///
/// Each entry is either a line or an error; once exhausted the source
/// reports [`TransportError::EndOfStream`].
pub struct ScriptedSource {
    script: VecDeque<Result<String, TransportError>>,
}

impl ScriptedSource {
    /// Build from a list of lines
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: lines.into_iter().map(|l| Ok(l.into())).collect(),
        }
    }

    /// Build from explicit read results
    pub fn from_results(results: Vec<Result<String, TransportError>>) -> Self {
        Self {
            script: results.into(),
        }
    }
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self) -> Result<String, TransportError> {
        self.script
            .pop_front()
            .unwrap_or(Err(TransportError::EndOfStream))
    }

    fn describe(&self) -> String {
        "scripted source".to_string()
    }
}

/// Opener that ignores the port name and replays a file
#[derive(Debug, Clone)]
pub struct ReplayOpener {
    path: PathBuf,
}

impl ReplayOpener {
    /// Replay the log at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PortOpener for ReplayOpener {
    fn open(
        &self,
        _port: &str,
        _baud_rate: u32,
        _read_timeout: Duration,
    ) -> Result<Box<dyn LineSource>, TransportError> {
        Ok(Box::new(ReplaySource::open(&self.path)?))
    }
}

/// Opener handing out a fresh [`ScriptedSource`] over the same lines on every open
#[derive(Debug, Clone, Default)]
pub struct ScriptedOpener {
    lines: Vec<String>,
}

impl ScriptedOpener {
    /// Serve `lines` on every open
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl PortOpener for ScriptedOpener {
    fn open(
        &self,
        _port: &str,
        _baud_rate: u32,
        _read_timeout: Duration,
    ) -> Result<Box<dyn LineSource>, TransportError> {
        Ok(Box::new(ScriptedSource::from_lines(self.lines.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_replay_strips_terminators() {
        let data = "$GPGGA,1\r\n$GPRMC,2\r\nlast";
        let mut source = ReplaySource::new(Cursor::new(data), "memory");

        assert_eq!(source.read_line().unwrap(), "$GPGGA,1");
        assert_eq!(source.read_line().unwrap(), "$GPRMC,2");
        assert_eq!(source.read_line().unwrap(), "last");
        assert!(matches!(source.read_line(), Err(TransportError::EndOfStream)));
        assert_eq!(source.lines_read(), 3);
    }

    #[test]
    fn test_replay_opener_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "$GPVTG,054.7,T,034.4,M,005.5,N,010.2,K*48").unwrap();

        let opener = ReplayOpener::new(file.path());
        let mut source = opener.open("ignored", 4800, Duration::from_secs(1)).unwrap();
        assert!(source.read_line().unwrap().starts_with("$GPVTG"));
        assert!(matches!(source.read_line(), Err(TransportError::EndOfStream)));
    }

    #[test]
    fn test_scripted_source() {
        let mut source = ScriptedSource::from_results(vec![
            Err(TransportError::Timeout),
            Ok("$GPGGA".to_string()),
        ]);
        assert!(source.read_line().unwrap_err().is_timeout());
        assert_eq!(source.read_line().unwrap(), "$GPGGA");
        assert!(matches!(source.read_line(), Err(TransportError::EndOfStream)));
    }
}
