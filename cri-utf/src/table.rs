//! `@UTF` table decoding

use std::io::Cursor;

use tracing::trace;

use crate::{column, storage, Error, Reader, Result, Value, UTF_MAGIC};

/// Offsets inside a table are relative to byte 8 (just past the magic and
/// table size).
const BASE: u64 = 8;

/// Fixed header span: magic through row count.
const HEADER_LEN: usize = 0x20;

/// A fully decoded `@UTF` table.
///
/// `constants` holds the per-table constant fields; every row also carries a
/// copy of them so callers can treat rows uniformly.
#[derive(Debug, Clone)]
pub struct UtfTable {
    pub name: String,
    pub constants: Vec<(String, Value)>,
    pub rows: Vec<Row>,
}

/// One decoded row: `(field name, value)` pairs, constants first, then
/// per-row fields, each group in schema order.
#[derive(Debug, Clone, Default)]
pub struct Row(Vec<(String, Value)>);

impl Row {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn required(&self, field: &str) -> Result<&Value> {
        self.get(field)
            .ok_or_else(|| Error::MissingField(field.to_string()))
    }

    /// Any integer field, widened to `i64`.
    pub fn int(&self, field: &str) -> Result<i64> {
        let value = self.required(field)?;
        value.as_int().ok_or_else(|| Error::TypeMismatch {
            field: field.to_string(),
            expected: "an integer",
        })
    }

    /// A UTF-8 string field.
    pub fn string(&self, field: &str) -> Result<&str> {
        let value = self.required(field)?;
        value.as_str().ok_or_else(|| Error::TypeMismatch {
            field: field.to_string(),
            expected: "a string",
        })
    }

    /// A data-region blob field.
    pub fn bytes(&self, field: &str) -> Result<&[u8]> {
        let value = self.required(field)?;
        value.as_bytes().ok_or_else(|| Error::TypeMismatch {
            field: field.to_string(),
            expected: "bytes",
        })
    }
}

/// Parsed schema entry.
struct Field {
    name: String,
    ty: u8,
    storage: Storage,
}

enum Storage {
    /// Value inlined in the schema, read exactly once.
    Constant(Value),
    PerRow,
    /// No storage at all; decodes as a zero of the declared type.
    Zero,
}

impl UtfTable {
    /// Parse a table from a slice beginning with the `@UTF` magic.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader);
        }

        let mut r = Reader::new(Cursor::new(data));

        let magic = r.read_u32()?;
        if magic != UTF_MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let _table_size = r.read_u32()?;
        let _unused = r.read_u16()?;
        let row_offset = r.read_u16()?;
        let string_table_offset = r.read_u32()?;
        let data_offset = r.read_u32()?;
        let table_name_offset = r.read_u32()?;
        let field_count = r.read_u16()?;
        let row_size = r.read_u16()?;
        let row_count = r.read_u32()?;

        let string_base = BASE + u64::from(string_table_offset);
        let data_base = BASE + u64::from(data_offset);
        if string_base > data.len() as u64 {
            return Err(Error::OffsetOutOfRange {
                region: "string",
                offset: string_base,
            });
        }

        let name_bytes = r.read_cstring_at(string_base + u64::from(table_name_offset))?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        // Schema pass: field descriptors, with constants decoded in place.
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            let flags = r.read_u8()?;
            let name_offset = r.read_u32()?;
            let ty = flags & column::MASK;

            let field_name = r.read_cstring_at(string_base + u64::from(name_offset))?;
            let field_name = String::from_utf8_lossy(&field_name).into_owned();

            let storage = match flags & storage::MASK {
                storage::CONSTANT | storage::CONSTANT2 => {
                    Storage::Constant(read_value(&mut r, ty, string_base, data_base, data.len())?)
                }
                storage::ZERO => Storage::Zero,
                _ => Storage::PerRow,
            };

            fields.push(Field {
                name: field_name,
                ty,
                storage,
            });
        }

        let constants: Vec<(String, Value)> = fields
            .iter()
            .filter_map(|f| match &f.storage {
                Storage::Constant(v) => Some((f.name.clone(), v.clone())),
                _ => None,
            })
            .collect();

        trace!(
            table = %name,
            fields = fields.len(),
            rows = row_count,
            "parsed @UTF schema"
        );

        // Row pass: constants by copy, per-row fields positionally.
        let mut rows = Vec::with_capacity(row_count as usize);
        for i in 0..row_count {
            let row_start = BASE + u64::from(row_offset) + u64::from(i) * u64::from(row_size);
            r.seek_to(row_start)?;

            let mut cells = Vec::with_capacity(fields.len());
            for (field_name, value) in &constants {
                cells.push((field_name.clone(), value.clone()));
            }
            for field in &fields {
                match field.storage {
                    Storage::PerRow => {
                        let value =
                            read_value(&mut r, field.ty, string_base, data_base, data.len())?;
                        cells.push((field.name.clone(), value));
                    }
                    Storage::Zero => {
                        cells.push((field.name.clone(), zero_value(field.ty)?));
                    }
                    Storage::Constant(_) => {}
                }
            }
            rows.push(Row(cells));
        }

        Ok(UtfTable {
            name,
            constants,
            rows,
        })
    }
}

fn read_value(
    r: &mut Reader<Cursor<&[u8]>>,
    ty: u8,
    string_base: u64,
    data_base: u64,
    len: usize,
) -> Result<Value> {
    Ok(match ty {
        column::U8 => Value::U8(r.read_u8()?),
        column::I8 => Value::I8(r.read_i8()?),
        column::U16 => Value::U16(r.read_u16()?),
        column::I16 => Value::I16(r.read_i16()?),
        column::U32 => Value::U32(r.read_u32()?),
        column::I32 => Value::I32(r.read_i32()?),
        column::U64 => Value::U64(r.read_u64()?),
        column::F32 => Value::F32(r.read_f32()?),
        column::STRING => {
            let offset = string_base + u64::from(r.read_u32()?);
            if offset > len as u64 {
                return Err(Error::OffsetOutOfRange {
                    region: "string",
                    offset,
                });
            }
            Value::Str(r.read_cstring_at(offset)?)
        }
        column::DATA => {
            let offset = data_base + u64::from(r.read_u32()?);
            let size = r.read_u32()? as u64;
            if offset + size > len as u64 {
                return Err(Error::OffsetOutOfRange {
                    region: "data",
                    offset,
                });
            }
            Value::Bytes(r.read_bytes_at(size as usize, offset)?)
        }
        other => return Err(Error::UnknownColumnType(other)),
    })
}

fn zero_value(ty: u8) -> Result<Value> {
    Ok(match ty {
        column::U8 => Value::U8(0),
        column::I8 => Value::I8(0),
        column::U16 => Value::U16(0),
        column::I16 => Value::I16(0),
        column::U32 => Value::U32(0),
        column::I32 => Value::I32(0),
        column::U64 => Value::U64(0),
        column::F32 => Value::F32(0.0),
        column::STRING => Value::Str(Vec::new()),
        column::DATA => Value::Bytes(Vec::new()),
        other => return Err(Error::UnknownColumnType(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::UtfTableBuilder;

    #[test]
    fn test_constants_and_per_row_fields() {
        let data = UtfTableBuilder::new("Header")
            .constant_u32("Version", 0x0102_0304)
            .per_row_u16("Index", &[7, 8])
            .per_row_string("Name", &["first", "second"])
            .build();

        let table = UtfTable::parse(&data).unwrap();
        assert_eq!(table.name, "Header");
        assert_eq!(table.rows.len(), 2);

        assert_eq!(table.constants.len(), 1);
        assert_eq!(table.constants[0].0, "Version");

        for (i, row) in table.rows.iter().enumerate() {
            // Constants are copied into every row
            assert_eq!(row.int("Version").unwrap(), 0x0102_0304);
            assert_eq!(row.int("Index").unwrap(), 7 + i as i64);
        }
        assert_eq!(table.rows[0].string("Name").unwrap(), "first");
        assert_eq!(table.rows[1].string("Name").unwrap(), "second");
    }

    #[test]
    fn test_field_order_preserved() {
        let data = UtfTableBuilder::new("Order")
            .per_row_u16("B", &[1])
            .per_row_u16("A", &[2])
            .per_row_u16("C", &[3])
            .build();

        let table = UtfTable::parse(&data).unwrap();
        let names: Vec<&str> = table.rows[0].fields().map(|(n, _)| n).collect();
        assert_eq!(names, ["B", "A", "C"]);
    }

    #[test]
    fn test_data_blob_and_zero_storage() {
        let data = UtfTableBuilder::new("Blobs")
            .per_row_bytes("Payload", &[b"\x01\x02\x03".to_vec()])
            .zero_u32("Reserved")
            .build();

        let table = UtfTable::parse(&data).unwrap();
        let row = &table.rows[0];
        assert_eq!(row.bytes("Payload").unwrap(), b"\x01\x02\x03");
        assert_eq!(row.int("Reserved").unwrap(), 0);
    }

    #[test]
    fn test_integer_widths_preserved() {
        let data = UtfTableBuilder::new("Widths")
            .per_row_u8("Small", &[0xFF])
            .per_row_u64("Large", &[u64::MAX])
            .build();

        let table = UtfTable::parse(&data).unwrap();
        let row = &table.rows[0];
        assert!(matches!(row.get("Small"), Some(Value::U8(0xFF))));
        assert!(matches!(row.get("Large"), Some(Value::U64(u64::MAX))));
    }

    #[test]
    fn test_type_mismatch() {
        let data = UtfTableBuilder::new("T")
            .per_row_u16("Index", &[1])
            .build();

        let table = UtfTable::parse(&data).unwrap();
        let err = table.rows[0].string("Index").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }), "{err:?}");

        let err = table.rows[0].int("Nope").unwrap_err();
        assert!(matches!(err, Error::MissingField(_)), "{err:?}");
    }

    #[test]
    fn test_bad_magic() {
        let mut data = UtfTableBuilder::new("T").per_row_u16("A", &[1]).build();
        data[0] = b'!';
        assert!(matches!(
            UtfTable::parse(&data),
            Err(Error::BadMagic(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            UtfTable::parse(b"@UTF\x00\x00\x00\x04"),
            Err(Error::TruncatedHeader)
        ));
    }

    #[test]
    fn test_unknown_column_type() {
        let mut data = UtfTableBuilder::new("T").per_row_u16("A", &[1]).build();
        // Schema starts at 0x20; first byte is the flags byte.
        data[0x20] = 0x5C;
        assert!(matches!(
            UtfTable::parse(&data),
            Err(Error::UnknownColumnType(0x0C))
        ));
    }
}
