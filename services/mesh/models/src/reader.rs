use mesh_wire::WireError;

/// Bounds-checked cursor over message parameters
pub(crate) struct ParameterReader<'a> {
    buf: &'a [u8],
    message: &'static str,
}

impl<'a> ParameterReader<'a> {
    pub fn new(buf: &'a [u8], message: &'static str) -> Self {
        Self { buf, message }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(truncated(self.message, n, self.buf.len()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

pub(crate) fn truncated(message: &str, needed: usize, actual: usize) -> WireError {
    WireError::MalformedPayload(format!(
        "{} truncated: need {} more bytes, have {}",
        message, needed, actual
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_rejects_short_reads() {
        let mut reader = ParameterReader::new(&[0x34, 0x12, 0x05], "Test");
        assert_eq!(reader.u16_le().unwrap(), 0x1234);
        assert!(matches!(reader.u16_le(), Err(WireError::MalformedPayload(_))));
        // A failed read consumes nothing
        assert_eq!(reader.u8().unwrap(), 0x05);
        assert!(reader.is_empty());
    }
}
