use bytes::Bytes;
use std::fmt;

/// A single header field: a pair of octet sequences plus a sensitivity flag.
///
/// Names are kept as raw octets; HTTP/2 requires them to be lowercase ASCII,
/// which the decoder's validation layer enforces. Sensitive fields are never
/// added to compression tables on the wire.
#[derive(Clone, Eq, PartialEq)]
pub struct HeaderField {
    name: Bytes,
    value: Bytes,
    sensitive: bool,
}

/// Classification of a header field name for block validation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldKind {
    Regular,
    RequestPseudo,
    ResponsePseudo,
    UnknownPseudo,
}

const REQUEST_PSEUDO: [&[u8]; 5] = [b":method", b":scheme", b":authority", b":path", b":protocol"];
const RESPONSE_PSEUDO: [&[u8]; 1] = [b":status"];

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> HeaderField {
        HeaderField {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    pub fn sensitive(name: impl Into<Bytes>, value: impl Into<Bytes>) -> HeaderField {
        HeaderField {
            name: name.into(),
            value: value.into(),
            sensitive: true,
        }
    }

    pub fn name(&self) -> &Bytes {
        &self.name
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    /// Builds a new field with this field's name and another value. Used when
    /// a literal representation references a table entry by name.
    pub fn with_value(&self, value: Bytes) -> HeaderField {
        HeaderField {
            name: self.name.clone(),
            value,
            sensitive: false,
        }
    }

    /// The field's size under the HPACK accounting rule: name length plus
    /// value length plus 32.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }

    pub fn kind(&self) -> FieldKind {
        if !self.name.starts_with(b":") {
            return FieldKind::Regular;
        }
        if REQUEST_PSEUDO.contains(&&self.name[..]) {
            return FieldKind::RequestPseudo;
        }
        if RESPONSE_PSEUDO.contains(&&self.name[..]) {
            return FieldKind::ResponsePseudo;
        }
        FieldKind::UnknownPseudo
    }

    /// A valid HTTP/2 field name is non-empty and contains no uppercase ASCII.
    pub fn has_valid_name(&self) -> bool {
        let name = match self.kind() {
            FieldKind::Regular => &self.name[..],
            _ => &self.name[1..],
        };

        !name.is_empty() && !name.iter().any(u8::is_ascii_uppercase)
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{:?}: {}",
            String::from_utf8_lossy(&self.name),
            if self.sensitive {
                "<sensitive>".into()
            } else {
                String::from_utf8_lossy(&self.value)
            }
        )
    }
}

/// An ordered list of decoded header fields, as delivered to the listener.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct HeaderList {
    fields: Vec<HeaderField>,
}

impl HeaderList {
    pub fn new() -> HeaderList {
        HeaderList { fields: Vec::new() }
    }

    pub fn push(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HeaderField> {
        self.fields.iter()
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.fields
            .iter()
            .find(|f| f.name()[..] == *name)
            .map(HeaderField::value)
    }

    pub fn remove(&mut self, name: &[u8]) {
        self.fields.retain(|f| f.name()[..] != *name);
    }

    /// Combined size of all fields under the HPACK accounting rule.
    pub fn size(&self) -> usize {
        self.fields.iter().map(HeaderField::size).sum()
    }
}

impl IntoIterator for HeaderList {
    type Item = HeaderField;
    type IntoIter = std::vec::IntoIter<HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl FromIterator<HeaderField> for HeaderList {
    fn from_iter<T: IntoIterator<Item = HeaderField>>(iter: T) -> Self {
        HeaderList {
            fields: iter.into_iter().collect(),
        }
    }
}
