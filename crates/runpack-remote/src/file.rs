use crate::{Transport, TransportError};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Reads `file://` URIs and bare filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl Transport for FileTransport {
    fn open(&self, uri: &str) -> Result<Box<dyn Read>, TransportError> {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        tracing::debug!("open {}", path.display());
        match File::open(path) {
            Ok(f) => Ok(Box::new(BufReader::new(f))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(TransportError::NotFound(uri.to_owned()))
            }
            Err(e) => Err(TransportError::Io {
                uri: uri.to_owned(),
                source: e,
            }),
        }
    }
}
