//! Byte and tag helpers for PDUs

use std::collections::HashSet;
use std::fmt::Write;

use super::Pdu;

/// Position of the first occurrence of `needle` in `haystack` at or after `offset`
pub fn find_bytes(haystack: &[u8], needle: &[u8], offset: usize) -> Option<usize> {
    if needle.is_empty() || offset > haystack.len() {
        return None;
    }
    haystack[offset..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + offset)
}

/// Render bytes as space separated upper-case hex pairs
pub fn bytes_to_hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Join tags into a sorted, comma separated string
pub fn tags_to_string(tags: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Split a comma separated string into tags, skipping empty entries
pub fn string_to_tags(value: &str) -> HashSet<String> {
    value
        .split(',')
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

impl Pdu {
    pub fn contains(&self, what: &[u8]) -> bool {
        find_bytes(self.data(), what, 0).is_some()
    }

    pub fn find(&self, offset: usize, what: &[u8]) -> Option<usize> {
        find_bytes(self.data(), what, offset)
    }

    pub fn starts_with(&self, what: &[u8]) -> bool {
        self.data().starts_with(what)
    }

    pub fn ends_with(&self, what: &[u8]) -> bool {
        self.data().ends_with(what)
    }

    /// Replace the first occurrence of `what`; returns whether anything changed
    pub fn replace_first(&mut self, what: &[u8], with: &[u8]) -> bool {
        let Some(position) = self.find(0, what) else {
            return false;
        };

        if what.len() == with.len() {
            self.buffer_mut()[position..position + with.len()].copy_from_slice(with);
            return true;
        }

        let data = self.data();
        let mut replaced = Vec::with_capacity(data.len() - what.len() + with.len());
        replaced.extend_from_slice(&data[..position]);
        replaced.extend_from_slice(with);
        replaced.extend_from_slice(&data[position + what.len()..]);
        self.set_data(replaced);
        true
    }

    /// Replace every non-overlapping occurrence of `what`; returns the number of replacements
    pub fn replace_all(&mut self, what: &[u8], with: &[u8]) -> usize {
        if what.is_empty() {
            return 0;
        }

        let data = self.data();
        let mut replaced = Vec::with_capacity(data.len());
        let mut count = 0;
        let mut cursor = 0;
        while let Some(position) = find_bytes(data, what, cursor) {
            replaced.extend_from_slice(&data[cursor..position]);
            replaced.extend_from_slice(with);
            cursor = position + what.len();
            count += 1;
        }

        if count > 0 {
            replaced.extend_from_slice(&data[cursor..]);
            self.set_data(replaced);
        }
        count
    }

    pub fn to_hex_string(&self) -> String {
        bytes_to_hex_string(self.data())
    }

    /// Data rendered as text, invalid sequences replaced
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.data()).into_owned()
    }
}
