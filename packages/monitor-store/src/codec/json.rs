use crate::domain::{RecordCodec, TransactionRecord};
use crate::{ErrorKind, Result, StoreError};

/// serde_json codec
///
/// Keeps the `.xml` extension so files stay interchangeable on disk layout;
/// only the content differs.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordCodec {
    pub pretty: bool,
}

impl RecordCodec for JsonRecordCodec {
    fn parse(&self, bytes: &[u8]) -> Result<TransactionRecord> {
        serde_json::from_slice(bytes).map_err(|e| {
            StoreError::new(ErrorKind::MalformedRecord, format!("JSON error: {}", e))
                .with_source(e)
        })
    }

    fn write(&self, record: &TransactionRecord) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(record)?
        } else {
            serde_json::to_vec(record)?
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_is_malformed() {
        let err = JsonRecordCodec::default().parse(b"{\"id\":").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_write_then_parse() {
        let codec = JsonRecordCodec { pretty: true };
        let record = TransactionRecord::new("1700000000000", "GET", "/", "localhost", 8080)
            .with_status(500);

        let bytes = codec.write(&record).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains('\n'));
        assert_eq!(codec.parse(&bytes).unwrap(), record);
    }
}
