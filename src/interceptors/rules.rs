use std::sync::Arc;

use log::trace;

use crate::interceptor::Interceptor;
use crate::pdu::Pdu;

/// Adds a tag to PDUs containing a byte pattern
pub struct TagInterceptor {
    code: Arc<str>,
    tag: String,
    pattern: Vec<u8>,
}

impl TagInterceptor {
    pub fn new(code: Arc<str>, tag: &str, pattern: &str) -> Self {
        Self {
            code,
            tag: tag.to_string(),
            pattern: pattern.as_bytes().to_vec(),
        }
    }
}

impl Interceptor for TagInterceptor {
    fn code(&self) -> &str {
        &self.code
    }

    fn intercept(&self, pdu: &mut Pdu) -> bool {
        if pdu.contains(&self.pattern) {
            trace!("[{}] tagging PDU as {}", pdu.connection(), self.tag);
            pdu.add_tag(self.tag.as_str());
        }
        true
    }
}

/// Replaces every occurrence of a byte pattern
pub struct ReplaceInterceptor {
    code: Arc<str>,
    find: Vec<u8>,
    replace: Vec<u8>,
}

impl ReplaceInterceptor {
    pub fn new(code: Arc<str>, find: &str, replace: &str) -> Self {
        Self {
            code,
            find: find.as_bytes().to_vec(),
            replace: replace.as_bytes().to_vec(),
        }
    }
}

impl Interceptor for ReplaceInterceptor {
    fn code(&self) -> &str {
        &self.code
    }

    fn intercept(&self, pdu: &mut Pdu) -> bool {
        let replaced = pdu.replace_all(&self.find, &self.replace);
        if replaced > 0 {
            trace!("[{}] {} replaced {} occurrence(s)", pdu.connection(), self.code, replaced);
        }
        true
    }
}

/// Drops PDUs carrying a tag or containing a byte pattern
///
/// With neither set every PDU is dropped.
pub struct DropInterceptor {
    code: Arc<str>,
    tag: Option<String>,
    pattern: Option<Vec<u8>>,
}

impl DropInterceptor {
    pub fn new(code: Arc<str>, tag: Option<String>, pattern: Option<&str>) -> Self {
        Self {
            code,
            tag,
            pattern: pattern.map(|pattern| pattern.as_bytes().to_vec()),
        }
    }

    fn matches(&self, pdu: &Pdu) -> bool {
        match (&self.tag, &self.pattern) {
            (None, None) => true,
            (tag, pattern) => {
                tag.as_deref().is_some_and(|tag| pdu.has_tag(tag))
                    || pattern.as_deref().is_some_and(|pattern| pdu.contains(pattern))
            }
        }
    }
}

impl Interceptor for DropInterceptor {
    fn code(&self) -> &str {
        &self.code
    }

    fn intercept(&self, pdu: &mut Pdu) -> bool {
        if self.matches(pdu) {
            trace!("[{}] {} dropping {} bytes", pdu.connection(), self.code, pdu.size());
            return false;
        }
        true
    }
}
