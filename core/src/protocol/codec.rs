use crate::protocol::ParseError;

pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let end = self.pos + N;
        let slice = self.buf.get(self.pos..end).ok_or(ParseError::TooShort {
            expected: end,
            actual: self.buf.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    pub fn i32(&mut self) -> Result<i32, ParseError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn i64(&mut self) -> Result<i64, ParseError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn f32(&mut self) -> Result<f32, ParseError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    pub fn i16(&mut self) -> Result<i16, ParseError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn bool(&mut self) -> Result<bool, ParseError> {
        Ok(self.i32()? != 0)
    }

    pub fn text<const N: usize>(&mut self) -> Result<String, ParseError> {
        let raw: [u8; N] = self.take()?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(N);
        std::str::from_utf8(&raw[..end])
            .map(str::to_owned)
            .map_err(|_| ParseError::InvalidString)
    }
}

#[derive(Default)]
pub(crate) struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.i32(i32::from(value))
    }

    pub fn text<const N: usize>(&mut self, value: &str) -> &mut Self {
        let mut raw = [0u8; N];
        let bytes = value.as_bytes();
        // keep a trailing NUL
        let len = bytes.len().min(N - 1);
        raw[..len].copy_from_slice(&bytes[..len]);
        self.buf.extend_from_slice(&raw);
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_field_is_nul_terminated_and_truncated() {
        let mut writer = FieldWriter::default();
        writer.text::<8>("S-Pol-radar");
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[7], 0);
        let mut reader = FieldReader::new(&bytes);
        assert_eq!(reader.text::<8>().unwrap(), "S-Pol-r");
    }

    #[test]
    fn short_buffer_reports_expected_length() {
        let mut reader = FieldReader::new(&[1, 2]);
        let err = reader.i32().unwrap_err();
        assert_eq!(
            err,
            ParseError::TooShort {
                expected: 4,
                actual: 2
            }
        );
    }
}
