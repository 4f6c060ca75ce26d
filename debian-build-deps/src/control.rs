// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading of deb822 control paragraphs.

Source package control files (`debian/control`, `.dsc`), the dpkg status
database and apt `Packages` indices all share the same syntax: paragraphs of
`Field: value` lines separated by blank lines, with continuation lines
starting with whitespace.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>.

`.dsc` files are usually wrapped in a PGP cleartext signature. [cleartext_reader]
strips that wrapping so the paragraphs inside can be read.
*/

use {
    crate::error::{BuildDepError, Result},
    pgp_cleartext::CleartextSignatureReader,
    std::io::{BufRead, BufReader},
};

const PGP_SIGNED_MESSAGE: &[u8] = b"-----BEGIN PGP SIGNED MESSAGE-----";

/// A field in a control paragraph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field value, with continuation lines joined by newlines.
    pub fn value_str(&self) -> &str {
        &self.value
    }
}

/// An ordered series of fields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing an existing field of the same name.
    ///
    /// Field names are compared case-insensitively.
    pub fn set_field(&mut self, field: ControlField) {
        self.fields
            .retain(|f| !f.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Obtain a field by name, case-insensitively.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the string value of a field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the value of a field that must be present.
    pub fn required_field_str(&self, name: &'static str) -> Result<&str> {
        self.field_str(name)
            .ok_or(BuildDepError::ControlRequiredFieldMissing(name))
    }

    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }
}

/// Incremental parser turning lines into [ControlParagraph].
#[derive(Default)]
struct ParagraphBuilder {
    paragraph: ControlParagraph,
    field: Option<(String, String)>,
}

impl ParagraphBuilder {
    /// Feed a line, without its trailing newline.
    ///
    /// Returns a paragraph when a blank line terminates one.
    fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        if line.trim().is_empty() {
            return Ok(self.finish());
        }

        if line.starts_with('#') {
            return Ok(None);
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            return match &mut self.field {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(line.trim());
                    Ok(None)
                }
                None => Err(BuildDepError::ControlParseError(format!(
                    "continuation line without a field: {}",
                    line
                ))),
            };
        }

        self.flush_field();

        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                self.field = Some((name.trim().to_string(), value.trim().to_string()));
                Ok(None)
            }
            _ => Err(BuildDepError::ControlParseError(format!(
                "line is not a field definition: {}",
                line
            ))),
        }
    }

    fn flush_field(&mut self) {
        if let Some((name, value)) = self.field.take() {
            self.paragraph.set_field(ControlField { name, value });
        }
    }

    fn finish(&mut self) -> Option<ControlParagraph> {
        self.flush_field();

        let paragraph = std::mem::take(&mut self.paragraph);
        if paragraph.is_empty() {
            None
        } else {
            Some(paragraph)
        }
    }
}

/// Obtain a reader over the cleartext of control data.
///
/// Data beginning with `-----BEGIN PGP SIGNED MESSAGE-----` is unwrapped through a
/// [CleartextSignatureReader], which removes the armor and dash escaping. Other data
/// is returned as is.
///
/// Signatures are parsed but NOT verified.
pub fn cleartext_reader<'a, R: BufRead + 'a>(mut reader: R) -> Result<Box<dyn BufRead + 'a>> {
    if reader.fill_buf()?.starts_with(PGP_SIGNED_MESSAGE) {
        Ok(Box::new(BufReader::new(CleartextSignatureReader::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Reads [ControlParagraph] instances from a reader.
///
/// The reader must not be PGP armored. Use [cleartext_reader] to unwrap signed data.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    builder: ParagraphBuilder,
    done: bool,
}

impl<R: BufRead> ControlParagraphReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            builder: ParagraphBuilder::default(),
            done: false,
        }
    }

    fn next_paragraph(&mut self) -> Result<Option<ControlParagraph>> {
        let mut line = String::new();

        loop {
            line.clear();

            if self.reader.read_line(&mut line)? == 0 {
                self.done = true;
                return Ok(self.builder.finish());
            }

            let line = line.trim_end_matches(&['\r', '\n'][..]);

            if let Some(paragraph) = self.builder.write_line(line)? {
                return Ok(Some(paragraph));
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_paragraph() {
            Ok(Some(paragraph)) => Some(Ok(paragraph)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Parse all paragraphs from a string, which may carry a PGP cleartext signature.
pub fn parse_paragraphs_str(s: &str) -> Result<Vec<ControlParagraph>> {
    ControlParagraphReader::new(cleartext_reader(s.as_bytes())?).collect()
}
