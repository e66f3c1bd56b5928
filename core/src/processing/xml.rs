use std::fmt::Display;

/// Builds the small flat XML fragments appended to status packets.
pub struct XmlBuilder {
    tag: String,
    out: String,
}

impl XmlBuilder {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            out: format!("<{}>\n", tag),
        }
    }

    pub fn field(mut self, name: &str, value: impl Display) -> Self {
        self.out.push_str(&format!("  <{0}>{1}</{0}>\n", name, value));
        self
    }

    pub fn float(self, name: &str, value: f64, precision: usize) -> Self {
        let text = format!("{:.*}", precision, value);
        self.field(name, text)
    }

    pub fn finish(mut self) -> String {
        self.out.push_str(&format!("</{}>\n", self.tag));
        self.out
    }
}
