//! Generic PLY container: header model plus decoding and encoding of the
//! three standard encodings. Values are held as `f64`, which represents every
//! PLY scalar type exactly.

use std::fmt;
use std::io::Write;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlyError {
    #[error("not a PLY file")]
    MissingMagic,
    #[error("header is not terminated by end_header")]
    UnterminatedHeader,
    #[error("header is not valid UTF-8")]
    HeaderEncoding,
    #[error("line {line}: {reason}")]
    Header { line: usize, reason: String },
    #[error("element {element:?}: {reason}")]
    Body { element: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl Encoding {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "ascii" => Some(Encoding::Ascii),
            "binary_little_endian" => Some(Encoding::BinaryLittleEndian),
            "binary_big_endian" => Some(Encoding::BinaryBigEndian),
            _ => None,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Encoding::Ascii => "ascii",
            Encoding::BinaryLittleEndian => "binary_little_endian",
            Encoding::BinaryBigEndian => "binary_big_endian",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarType {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "char" | "int8" => ScalarType::Char,
            "uchar" | "uint8" => ScalarType::UChar,
            "short" | "int16" => ScalarType::Short,
            "ushort" | "uint16" => ScalarType::UShort,
            "int" | "int32" => ScalarType::Int,
            "uint" | "uint32" => ScalarType::UInt,
            "float" | "float32" => ScalarType::Float,
            "double" | "float64" => ScalarType::Double,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Double => 8,
        }
    }

    fn is_integer(self) -> bool {
        !matches!(self, ScalarType::Float | ScalarType::Double)
    }

    fn decode(self, bytes: &[u8], encoding: Encoding) -> f64 {
        macro_rules! read {
            ($ty:ty) => {{
                let raw: [u8; std::mem::size_of::<$ty>()] = bytes
                    .try_into()
                    .unwrap_or([0; std::mem::size_of::<$ty>()]);
                match encoding {
                    Encoding::BinaryBigEndian => <$ty>::from_be_bytes(raw) as f64,
                    _ => <$ty>::from_le_bytes(raw) as f64,
                }
            }};
        }
        match self {
            ScalarType::Char => read!(i8),
            ScalarType::UChar => read!(u8),
            ScalarType::Short => read!(i16),
            ScalarType::UShort => read!(u16),
            ScalarType::Int => read!(i32),
            ScalarType::UInt => read!(u32),
            ScalarType::Float => read!(f32),
            ScalarType::Double => read!(f64),
        }
    }

    fn encode_le(self, value: f64, out: &mut Vec<u8>) {
        match self {
            ScalarType::Char => out.extend_from_slice(&(value as i8).to_le_bytes()),
            ScalarType::UChar => out.extend_from_slice(&(value as u8).to_le_bytes()),
            ScalarType::Short => out.extend_from_slice(&(value as i16).to_le_bytes()),
            ScalarType::UShort => out.extend_from_slice(&(value as u16).to_le_bytes()),
            ScalarType::Int => out.extend_from_slice(&(value as i32).to_le_bytes()),
            ScalarType::UInt => out.extend_from_slice(&(value as u32).to_le_bytes()),
            ScalarType::Float => out.extend_from_slice(&(value as f32).to_le_bytes()),
            ScalarType::Double => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalarType::Char => "char",
            ScalarType::UChar => "uchar",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

impl Property {
    pub fn scalar(name: &str, ty: ScalarType) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Scalar(ty),
        }
    }
}

/// One element of a PLY file. `values` is row-major; a list property
/// contributes its length followed by its items.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub name: String,
    pub count: usize,
    pub properties: Vec<Property>,
    pub values: Vec<f64>,
}

impl Element {
    pub fn new(name: &str, properties: Vec<Property>) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            properties,
            values: Vec::new(),
        }
    }

    /// Append a row of scalar values. Only valid for list-free elements.
    pub fn push_row(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.properties.len());
        self.values.extend_from_slice(row);
        self.count += 1;
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Scalar value of every property per row; list properties yield `NaN`.
    pub fn scalar_rows(&self) -> ScalarRows<'_> {
        ScalarRows {
            element: self,
            offset: 0,
            row: vec![0.0; self.properties.len()],
            remaining: self.count,
        }
    }
}

pub struct ScalarRows<'a> {
    element: &'a Element,
    offset: usize,
    row: Vec<f64>,
    remaining: usize,
}

impl ScalarRows<'_> {
    /// Advance to the next row. Returns `None` once every row is consumed.
    pub fn next_row(&mut self) -> Option<&[f64]> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        for (slot, property) in self.row.iter_mut().zip(&self.element.properties) {
            match property.kind {
                PropertyKind::Scalar(_) => {
                    *slot = self.element.values[self.offset];
                    self.offset += 1;
                }
                PropertyKind::List { .. } => {
                    let len = self.element.values[self.offset] as usize;
                    self.offset += 1 + len;
                    *slot = f64::NAN;
                }
            }
        }
        Some(&self.row)
    }
}

/// Header lines other than format and element/property declarations, kept in
/// their original order.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderNote {
    Comment(String),
    ObjInfo(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlyFile {
    pub encoding: Encoding,
    pub notes: Vec<HeaderNote>,
    pub elements: Vec<Element>,
}

impl PlyFile {
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Serialize as binary little-endian, keeping notes, element order,
    /// property order and values.
    pub fn to_binary_le(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            256 + self
                .elements
                .iter()
                .map(|e| e.values.len() * 4)
                .sum::<usize>(),
        );
        write_header(&mut out, Encoding::BinaryLittleEndian, &self.notes, &self.elements);
        for element in &self.elements {
            let mut values = element.values.iter().copied();
            for _ in 0..element.count {
                for property in &element.properties {
                    match property.kind {
                        PropertyKind::Scalar(ty) => {
                            ty.encode_le(values.next().unwrap_or_default(), &mut out);
                        }
                        PropertyKind::List { count, item } => {
                            let len = values.next().unwrap_or_default();
                            count.encode_le(len, &mut out);
                            for _ in 0..len as usize {
                                item.encode_le(values.next().unwrap_or_default(), &mut out);
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

fn write_header(out: &mut Vec<u8>, encoding: Encoding, notes: &[HeaderNote], elements: &[Element]) {
    // Writing into a Vec cannot fail.
    let _ = writeln!(out, "ply");
    let _ = writeln!(out, "format {} 1.0", encoding.keyword());
    for note in notes {
        let _ = match note {
            HeaderNote::Comment(text) => writeln!(out, "comment {text}"),
            HeaderNote::ObjInfo(text) => writeln!(out, "obj_info {text}"),
        };
    }
    for element in elements {
        let _ = writeln!(out, "element {} {}", element.name, element.count);
        for property in &element.properties {
            let _ = match property.kind {
                PropertyKind::Scalar(ty) => writeln!(out, "property {ty} {}", property.name),
                PropertyKind::List { count, item } => {
                    writeln!(out, "property list {count} {item} {}", property.name)
                }
            };
        }
    }
    let _ = writeln!(out, "end_header");
}

/// Parsed header plus the byte offset where the body starts.
pub struct Header {
    pub encoding: Encoding,
    pub notes: Vec<HeaderNote>,
    pub elements: Vec<Element>,
    pub body_offset: usize,
}

pub fn parse_header(bytes: &[u8]) -> Result<Header, PlyError> {
    if !bytes.starts_with(b"ply") {
        return Err(PlyError::MissingMagic);
    }
    let mut lines = Vec::new();
    let mut start = 0usize;
    let body_offset = loop {
        if start >= bytes.len() {
            return Err(PlyError::UnterminatedHeader);
        }
        let (end, next) = match bytes[start..].iter().position(|&b| b == b'\n') {
            Some(pos) => (start + pos, start + pos + 1),
            None => (bytes.len(), bytes.len()),
        };
        let raw = bytes[start..end].trim_ascii_end();
        if raw == b"end_header" {
            break next;
        }
        lines.push(std::str::from_utf8(raw).map_err(|_| PlyError::HeaderEncoding)?);
        start = next;
    };

    let mut encoding = None;
    let mut notes = Vec::new();
    let mut elements: Vec<Element> = Vec::new();

    for (idx, &line) in lines.iter().enumerate().skip(1) {
        let line_no = idx + 1;
        let header_err = |reason: &str| PlyError::Header {
            line: line_no,
            reason: reason.to_string(),
        };
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            None => {}
            Some("format") => {
                let keyword = tokens.next().ok_or_else(|| header_err("missing format"))?;
                encoding = Some(
                    Encoding::parse(keyword)
                        .ok_or_else(|| header_err(&format!("unknown format {keyword:?}")))?,
                );
            }
            Some("comment") => notes.push(HeaderNote::Comment(note_text(line, "comment"))),
            Some("obj_info") => notes.push(HeaderNote::ObjInfo(note_text(line, "obj_info"))),
            Some("element") => {
                let name = tokens.next().ok_or_else(|| header_err("missing element name"))?;
                let count = tokens
                    .next()
                    .and_then(|t| t.parse::<usize>().ok())
                    .ok_or_else(|| header_err("invalid element count"))?;
                let mut element = Element::new(name, Vec::new());
                element.count = count;
                elements.push(element);
            }
            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| header_err("property before any element"))?;
                let first = tokens.next().ok_or_else(|| header_err("missing property type"))?;
                let kind = if first == "list" {
                    let count = tokens
                        .next()
                        .and_then(ScalarType::parse)
                        .ok_or_else(|| header_err("invalid list count type"))?;
                    let item = tokens
                        .next()
                        .and_then(ScalarType::parse)
                        .ok_or_else(|| header_err("invalid list item type"))?;
                    if !count.is_integer() {
                        return Err(header_err("list count type must be an integer"));
                    }
                    PropertyKind::List { count, item }
                } else {
                    PropertyKind::Scalar(
                        ScalarType::parse(first)
                            .ok_or_else(|| header_err(&format!("unknown type {first:?}")))?,
                    )
                };
                let name = tokens.next().ok_or_else(|| header_err("missing property name"))?;
                element.properties.push(Property {
                    name: name.to_string(),
                    kind,
                });
            }
            Some(other) => return Err(header_err(&format!("unexpected keyword {other:?}"))),
        }
    }

    let encoding = encoding.ok_or(PlyError::Header {
        line: 2,
        reason: "missing format line".to_string(),
    })?;
    Ok(Header {
        encoding,
        notes,
        elements,
        body_offset,
    })
}

fn note_text(line: &str, keyword: &str) -> String {
    let rest = line.trim_start().strip_prefix(keyword).unwrap_or_default();
    rest.strip_prefix(' ').unwrap_or(rest).to_string()
}

pub fn parse(bytes: &[u8]) -> Result<PlyFile, PlyError> {
    let Header {
        encoding,
        notes,
        mut elements,
        body_offset,
    } = parse_header(bytes)?;
    let body = &bytes[body_offset..];

    match encoding {
        Encoding::Ascii => decode_ascii(body, &mut elements)?,
        _ => decode_binary(body, encoding, &mut elements)?,
    }

    Ok(PlyFile {
        encoding,
        notes,
        elements,
    })
}

fn decode_binary(body: &[u8], encoding: Encoding, elements: &mut [Element]) -> Result<(), PlyError> {
    let mut cursor = 0usize;
    for element in elements.iter_mut() {
        // Every row needs at least this many bytes, so the body bounds how
        // many rows can really follow whatever count the header declares.
        let row_min_bytes: usize = element
            .properties
            .iter()
            .map(|p| match p.kind {
                PropertyKind::Scalar(ty) => ty.size(),
                PropertyKind::List { count, .. } => count.size(),
            })
            .sum();
        if row_min_bytes == 0 {
            continue;
        }
        let rows_available = body.len().saturating_sub(cursor) / row_min_bytes;
        let capacity = element.count.min(rows_available) * element.properties.len();

        let truncated = |name: &str| PlyError::Body {
            element: name.to_string(),
            reason: "unexpected end of data".to_string(),
        };
        let mut take = |ty: ScalarType, name: &str| -> Result<f64, PlyError> {
            let end = cursor + ty.size();
            let bytes = body.get(cursor..end).ok_or_else(|| truncated(name))?;
            cursor = end;
            Ok(ty.decode(bytes, encoding))
        };

        let mut values = Vec::with_capacity(capacity);
        for _ in 0..element.count {
            for property in &element.properties {
                match property.kind {
                    PropertyKind::Scalar(ty) => values.push(take(ty, &element.name)?),
                    PropertyKind::List { count, item } => {
                        let len = take(count, &element.name)?;
                        if len < 0.0 {
                            return Err(PlyError::Body {
                                element: element.name.clone(),
                                reason: format!("negative list length {len}"),
                            });
                        }
                        values.push(len);
                        for _ in 0..len as usize {
                            values.push(take(item, &element.name)?);
                        }
                    }
                }
            }
        }
        element.values = values;
    }
    Ok(())
}

fn decode_ascii(body: &[u8], elements: &mut [Element]) -> Result<(), PlyError> {
    let text = std::str::from_utf8(body).map_err(|_| PlyError::Body {
        element: String::new(),
        reason: "ascii body is not valid UTF-8".to_string(),
    })?;
    let mut tokens = text.split_ascii_whitespace();
    for element in elements.iter_mut() {
        let name = element.name.clone();
        let mut next = |ty: ScalarType| -> Result<f64, PlyError> {
            let token = tokens.next().ok_or_else(|| PlyError::Body {
                element: name.clone(),
                reason: "unexpected end of data".to_string(),
            })?;
            let value = token.parse::<f64>().map_err(|_| PlyError::Body {
                element: name.clone(),
                reason: format!("invalid number {token:?}"),
            })?;
            Ok(if ty == ScalarType::Float {
                value as f32 as f64
            } else {
                value
            })
        };

        if element.properties.is_empty() {
            continue;
        }
        let mut values = Vec::new();
        for _ in 0..element.count {
            for property in &element.properties {
                match property.kind {
                    PropertyKind::Scalar(ty) => values.push(next(ty)?),
                    PropertyKind::List { count, item } => {
                        let len = next(count)?;
                        if len < 0.0 || len.fract() != 0.0 {
                            return Err(PlyError::Body {
                                element: element.name.clone(),
                                reason: format!("invalid list length {len}"),
                            });
                        }
                        values.push(len);
                        for _ in 0..len as usize {
                            values.push(next(item)?);
                        }
                    }
                }
            }
        }
        element.values = values;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_MESH: &str = "ply\n\
format ascii 1.0\n\
comment made by hand\n\
obj_info scanner v2\n\
element vertex 2\n\
property float x\n\
property float y\n\
property uchar red\n\
element face 1\n\
property list uchar int vertex_indices\n\
end_header\n\
0.5 -1 255\n\
2 3.25 7\n\
3 0 1 1\n";

    #[test]
    fn ascii_header_and_body_are_parsed() {
        let ply = parse(ASCII_MESH.as_bytes()).unwrap();
        assert_eq!(ply.encoding, Encoding::Ascii);
        assert_eq!(
            ply.notes,
            vec![
                HeaderNote::Comment("made by hand".to_string()),
                HeaderNote::ObjInfo("scanner v2".to_string()),
            ]
        );
        let vertex = ply.element("vertex").unwrap();
        assert_eq!(vertex.count, 2);
        assert_eq!(vertex.values, vec![0.5, -1.0, 255.0, 2.0, 3.25, 7.0]);
        let face = ply.element("face").unwrap();
        assert_eq!(face.values, vec![3.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn binary_little_endian_reencodes_identically() {
        let ascii = parse(ASCII_MESH.as_bytes()).unwrap();
        let binary = ascii.to_binary_le();
        let reparsed = parse(&binary).unwrap();
        assert_eq!(reparsed.encoding, Encoding::BinaryLittleEndian);
        assert_eq!(reparsed.elements, ascii.elements);
        assert_eq!(reparsed.notes, ascii.notes);
        assert_eq!(reparsed.to_binary_le(), binary);
    }

    #[test]
    fn big_endian_bodies_are_decoded() {
        let mut bytes = b"ply\nformat binary_big_endian 1.0\nelement vertex 1\nproperty float x\nproperty ushort id\nend_header\n".to_vec();
        bytes.extend_from_slice(&1.5f32.to_be_bytes());
        bytes.extend_from_slice(&513u16.to_be_bytes());
        let ply = parse(&bytes).unwrap();
        assert_eq!(ply.element("vertex").unwrap().values, vec![1.5, 513.0]);
    }

    #[test]
    fn scalar_rows_skip_list_payloads() {
        let ply = parse(ASCII_MESH.as_bytes()).unwrap();
        let face = ply.element("face").unwrap();
        let mut rows = face.scalar_rows();
        assert!(rows.next_row().unwrap()[0].is_nan());
        assert!(rows.next_row().is_none());

        let vertex = ply.element("vertex").unwrap();
        let mut rows = vertex.scalar_rows();
        assert_eq!(rows.next_row().unwrap(), &[0.5, -1.0, 255.0]);
        assert_eq!(rows.next_row().unwrap(), &[2.0, 3.25, 7.0]);
        assert!(rows.next_row().is_none());
    }

    #[test]
    fn truncated_binary_bodies_fail() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 2\nproperty float x\nend_header\n".to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        assert!(matches!(parse(&bytes), Err(PlyError::Body { .. })));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(parse(b"\x00\x01garbage"), Err(PlyError::MissingMagic)));
        assert!(matches!(
            parse(b"ply\nformat ascii 1.0\nelement vertex 1\n"),
            Err(PlyError::UnterminatedHeader)
        ));
        assert!(matches!(
            parse(b"ply\nformat exotic 1.0\nend_header\n"),
            Err(PlyError::Header { .. })
        ));
    }

    #[test]
    fn end_header_inside_a_comment_does_not_end_the_header() {
        let text = "ply\n\
format ascii 1.0\n\
comment exported before end_header was patched\n\
element vertex 1\n\
property float x\n\
end_header\r\n\
4.5\n";
        let ply = parse(text.as_bytes()).unwrap();
        assert_eq!(
            ply.notes,
            vec![HeaderNote::Comment(
                "exported before end_header was patched".to_string()
            )]
        );
        assert_eq!(ply.element("vertex").unwrap().values, vec![4.5]);
    }

    #[test]
    fn inflated_counts_fail_on_the_body_not_the_allocator() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 4000000000\nproperty float x\nproperty float y\nproperty float z\nend_header\n".to_vec();
        for v in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert!(matches!(parse(&bytes), Err(PlyError::Body { .. })));

        let empty = b"ply\nformat binary_little_endian 1.0\nelement marker 4000000000\nend_header\n";
        let ply = parse(empty).unwrap();
        assert!(ply.element("marker").unwrap().values.is_empty());
    }
}
