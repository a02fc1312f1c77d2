//! `${name}` placeholder substitution for script bodies and templates.
//!
//! Unknown names and unterminated placeholders are left as written.
//! `\${` produces a literal `${`, and `\}` inside a placeholder name
//! produces a literal `}`.

use std::collections::BTreeMap;

const OPEN: &str = "${";
const CLOSE: char = '}';
const ESCAPE: u8 = b'\\';

/// Substitutes placeholders from one or more variable layers.
///
/// Layers added later take precedence over earlier ones.
#[derive(Debug, Clone, Default)]
pub struct VariableReplacer {
    layers: Vec<BTreeMap<String, String>>,
}

impl VariableReplacer {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self {
            layers: vec![variables],
        }
    }

    /// Add a layer that shadows the existing ones
    pub fn layered(mut self, variables: BTreeMap<String, String>) -> Self {
        self.layers.push(variables);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(name))
            .map(String::as_str)
    }

    /// All variables, higher layers winning
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut all = BTreeMap::new();
        for layer in &self.layers {
            all.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        all
    }

    pub fn replace(&self, text: &str) -> String {
        let Some(mut start) = text.find(OPEN) else {
            return text.to_string();
        };
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut offset = 0;

        loop {
            if start > 0 && bytes[start - 1] == ESCAPE {
                out.push_str(&text[offset..start - 1]);
                out.push_str(OPEN);
                offset = start + OPEN.len();
            } else {
                out.push_str(&text[offset..start]);
                offset = start + OPEN.len();

                let mut name = String::new();
                let mut end = find_from(text, offset, CLOSE);
                while let Some(close) = end {
                    if close > offset && bytes[close - 1] == ESCAPE {
                        name.push_str(&text[offset..close - 1]);
                        name.push(CLOSE);
                        offset = close + 1;
                        end = find_from(text, offset, CLOSE);
                    } else {
                        name.push_str(&text[offset..close]);
                        break;
                    }
                }

                match end {
                    None => {
                        out.push_str(&text[start..]);
                        offset = text.len();
                    }
                    Some(close) => {
                        match self.lookup(&name) {
                            Some(value) => out.push_str(value),
                            None => {
                                out.push_str(OPEN);
                                out.push_str(&name);
                                out.push(CLOSE);
                            }
                        }
                        offset = close + 1;
                    }
                }
            }

            match text[offset..].find(OPEN) {
                Some(index) => start = offset + index,
                None => break,
            }
        }

        out.push_str(&text[offset..]);
        out
    }
}

fn find_from(text: &str, from: usize, needle: char) -> Option<usize> {
    text[from..].find(needle).map(|index| from + index)
}
