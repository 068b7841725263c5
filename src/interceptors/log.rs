use std::sync::Arc;

use log::info;

use crate::interceptor::Interceptor;
use crate::pdu::util::{bytes_to_hex_string, tags_to_string};
use crate::pdu::Pdu;

/// Logs every PDU and passes it on
pub struct LogInterceptor {
    code: Arc<str>,
    index: usize,
    hex: bool,
    preview: usize,
}

impl LogInterceptor {
    pub fn new(code: Arc<str>, index: usize, hex: bool, preview: usize) -> Self {
        Self {
            code,
            index,
            hex,
            preview,
        }
    }

    /// Payload preview, cut to `preview` bytes
    pub fn render(&self, pdu: &Pdu) -> String {
        let data = pdu.data();
        let shown = &data[..data.len().min(self.preview)];
        let mut text = if self.hex {
            bytes_to_hex_string(shown)
        } else {
            String::from_utf8_lossy(shown).escape_debug().to_string()
        };
        if shown.len() < data.len() {
            text.push_str("...");
        }
        text
    }
}

impl Interceptor for LogInterceptor {
    fn code(&self) -> &str {
        &self.code
    }

    fn intercept(&self, pdu: &mut Pdu) -> bool {
        info!(
            "[{}] {} {} bytes tags=[{}] stage={}: {}",
            pdu.connection(),
            pdu.destination(),
            pdu.size(),
            tags_to_string(pdu.tags()),
            self.index,
            self.render(pdu)
        );
        true
    }
}
