//! On-disk record encoding: three length-prefixed UTF-8 strings.

use data_backplane::{BackplaneError, Entry};

// Each string is a u32 little-endian byte length followed by UTF-8 bytes, in
// order owner, type, data.

pub(crate) fn encode_record(owner: &str, entry_type: &str, data: &str) -> Vec<u8> {
    let mut encoded =
        Vec::with_capacity(12 + owner.len() + entry_type.len() + data.len());
    for field in [owner, entry_type, data] {
        encoded.extend_from_slice(&(field.len() as u32).to_le_bytes());
        encoded.extend_from_slice(field.as_bytes());
    }
    encoded
}

pub(crate) fn decode_record(content: &[u8]) -> Result<Entry, BackplaneError> {
    let mut cursor = 0usize;
    let mut fields = Vec::with_capacity(3);
    for _ in 0..3 {
        let (field, next) = read_string(content, cursor)?;
        fields.push(field);
        cursor = next;
    }
    if cursor != content.len() {
        return Err(BackplaneError::MalformedEntry(format!(
            "{} trailing bytes after record",
            content.len() - cursor
        )));
    }
    let mut fields = fields.into_iter();
    Ok(Entry::new(
        fields.next().unwrap_or_default(),
        fields.next().unwrap_or_default(),
        fields.next().unwrap_or_default(),
    ))
}

fn read_string(content: &[u8], cursor: usize) -> Result<(String, usize), BackplaneError> {
    let length_end = cursor
        .checked_add(4)
        .filter(|end| *end <= content.len())
        .ok_or_else(|| BackplaneError::MalformedEntry("truncated length prefix".to_string()))?;
    let mut length_bytes = [0u8; 4];
    length_bytes.copy_from_slice(&content[cursor..length_end]);
    let length = u32::from_le_bytes(length_bytes) as usize;

    let field_end = length_end
        .checked_add(length)
        .filter(|end| *end <= content.len())
        .ok_or_else(|| BackplaneError::MalformedEntry("truncated field".to_string()))?;
    let field = std::str::from_utf8(&content[length_end..field_end])
        .map_err(|err| BackplaneError::MalformedEntry(format!("invalid UTF-8: {err}")))?
        .to_string();
    Ok((field, field_end))
}
