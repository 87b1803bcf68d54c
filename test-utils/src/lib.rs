//! Shared fixture builders for workspace tests.
//!
//! The format crates only decode CRI containers, so tests need a way to
//! produce well-formed `@UTF` tables and AFS2 archives from scratch. These
//! builders write just enough of the formats for fixtures; they are not a
//! general-purpose encoder.

/// Schema storage/type flag bytes, mirroring the parser's constants.
const STORAGE_PER_ROW: u8 = 0x50;
const STORAGE_CONSTANT: u8 = 0x30;
const STORAGE_ZERO: u8 = 0x10;

const TYPE_U8: u8 = 0x00;
const TYPE_U16: u8 = 0x02;
const TYPE_U32: u8 = 0x04;
const TYPE_U64: u8 = 0x06;
const TYPE_STRING: u8 = 0x0A;
const TYPE_DATA: u8 = 0x0B;

enum Column {
    ConstU32(u32),
    ZeroU32,
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    Str(Vec<Vec<u8>>),
    Data(Vec<Vec<u8>>),
}

impl Column {
    fn flags(&self) -> u8 {
        match self {
            Column::ConstU32(_) => STORAGE_CONSTANT | TYPE_U32,
            Column::ZeroU32 => STORAGE_ZERO | TYPE_U32,
            Column::U8(_) => STORAGE_PER_ROW | TYPE_U8,
            Column::U16(_) => STORAGE_PER_ROW | TYPE_U16,
            Column::U32(_) => STORAGE_PER_ROW | TYPE_U32,
            Column::U64(_) => STORAGE_PER_ROW | TYPE_U64,
            Column::Str(_) => STORAGE_PER_ROW | TYPE_STRING,
            Column::Data(_) => STORAGE_PER_ROW | TYPE_DATA,
        }
    }

    fn row_width(&self) -> u16 {
        match self {
            Column::ConstU32(_) | Column::ZeroU32 => 0,
            Column::U8(_) => 1,
            Column::U16(_) => 2,
            Column::U32(_) | Column::Str(_) => 4,
            Column::U64(_) | Column::Data(_) => 8,
        }
    }

    fn row_count(&self) -> usize {
        match self {
            Column::ConstU32(_) | Column::ZeroU32 => 0,
            Column::U8(v) => v.len(),
            Column::U16(v) => v.len(),
            Column::U32(v) => v.len(),
            Column::U64(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Data(v) => v.len(),
        }
    }
}

/// Builds a serialized `@UTF` table.
pub struct UtfTableBuilder {
    name: String,
    fields: Vec<(String, Column)>,
}

impl UtfTableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn constant_u32(mut self, name: &str, value: u32) -> Self {
        self.fields.push((name.to_string(), Column::ConstU32(value)));
        self
    }

    pub fn zero_u32(mut self, name: &str) -> Self {
        self.fields.push((name.to_string(), Column::ZeroU32));
        self
    }

    pub fn per_row_u8(mut self, name: &str, values: &[u8]) -> Self {
        self.fields.push((name.to_string(), Column::U8(values.to_vec())));
        self
    }

    pub fn per_row_u16(mut self, name: &str, values: &[u16]) -> Self {
        self.fields.push((name.to_string(), Column::U16(values.to_vec())));
        self
    }

    pub fn per_row_u32(mut self, name: &str, values: &[u32]) -> Self {
        self.fields.push((name.to_string(), Column::U32(values.to_vec())));
        self
    }

    pub fn per_row_u64(mut self, name: &str, values: &[u64]) -> Self {
        self.fields.push((name.to_string(), Column::U64(values.to_vec())));
        self
    }

    pub fn per_row_string(mut self, name: &str, values: &[&str]) -> Self {
        let values = values.iter().map(|s| s.as_bytes().to_vec()).collect();
        self.fields.push((name.to_string(), Column::Str(values)));
        self
    }

    /// Raw string-table bytes, for non-UTF-8 (e.g. Shift-JIS) entries.
    pub fn per_row_string_bytes(mut self, name: &str, values: &[Vec<u8>]) -> Self {
        self.fields.push((name.to_string(), Column::Str(values.to_vec())));
        self
    }

    pub fn per_row_bytes(mut self, name: &str, values: &[Vec<u8>]) -> Self {
        self.fields.push((name.to_string(), Column::Data(values.to_vec())));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let row_count = self
            .fields
            .iter()
            .map(|(_, c)| c.row_count())
            .max()
            .unwrap_or(0);
        let row_size: u16 = self.fields.iter().map(|(_, c)| c.row_width()).sum();

        // String table: table name first, then field names, then cell strings.
        let mut strings: Vec<u8> = Vec::new();
        fn intern(strings: &mut Vec<u8>, s: &[u8]) -> u32 {
            let offset = strings.len() as u32;
            strings.extend_from_slice(s);
            strings.push(0);
            offset
        }

        let name_offset = intern(&mut strings, self.name.as_bytes());
        let field_name_offsets: Vec<u32> = self
            .fields
            .iter()
            .map(|(name, _)| intern(&mut strings, name.as_bytes()))
            .collect();

        let mut cell_string_offsets: Vec<Vec<u32>> = Vec::new();
        let mut data_region: Vec<u8> = Vec::new();
        let mut cell_data_spans: Vec<Vec<(u32, u32)>> = Vec::new();
        for (_, col) in &self.fields {
            match col {
                Column::Str(values) => {
                    let offsets = values.iter().map(|v| intern(&mut strings, v)).collect();
                    cell_string_offsets.push(offsets);
                    cell_data_spans.push(Vec::new());
                }
                Column::Data(values) => {
                    let spans = values
                        .iter()
                        .map(|v| {
                            let offset = data_region.len() as u32;
                            data_region.extend_from_slice(v);
                            (offset, v.len() as u32)
                        })
                        .collect();
                    cell_data_spans.push(spans);
                    cell_string_offsets.push(Vec::new());
                }
                _ => {
                    cell_string_offsets.push(Vec::new());
                    cell_data_spans.push(Vec::new());
                }
            }
        }

        // Schema: flags + name offset, constants inlined.
        let mut schema: Vec<u8> = Vec::new();
        for (i, (_, col)) in self.fields.iter().enumerate() {
            schema.push(col.flags());
            schema.extend_from_slice(&field_name_offsets[i].to_be_bytes());
            if let Column::ConstU32(v) = col {
                schema.extend_from_slice(&v.to_be_bytes());
            }
        }

        // Rows.
        let mut rows: Vec<u8> = Vec::new();
        for row in 0..row_count {
            for (i, (_, col)) in self.fields.iter().enumerate() {
                match col {
                    Column::ConstU32(_) | Column::ZeroU32 => {}
                    Column::U8(v) => rows.push(v[row]),
                    Column::U16(v) => rows.extend_from_slice(&v[row].to_be_bytes()),
                    Column::U32(v) => rows.extend_from_slice(&v[row].to_be_bytes()),
                    Column::U64(v) => rows.extend_from_slice(&v[row].to_be_bytes()),
                    Column::Str(_) => {
                        rows.extend_from_slice(&cell_string_offsets[i][row].to_be_bytes())
                    }
                    Column::Data(_) => {
                        let (offset, size) = cell_data_spans[i][row];
                        rows.extend_from_slice(&offset.to_be_bytes());
                        rows.extend_from_slice(&size.to_be_bytes());
                    }
                }
            }
        }

        // Absolute layout: header, schema, rows, strings, data. All header
        // offsets are relative to byte 8.
        let row_offset = (0x20 + schema.len()) as u32 - 8;
        let string_table_offset = row_offset + rows.len() as u32;
        let data_offset = string_table_offset + strings.len() as u32;
        let total = 8 + data_offset + data_region.len() as u32;

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(b"@UTF");
        out.extend_from_slice(&(total - 8).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(row_offset as u16).to_be_bytes());
        out.extend_from_slice(&string_table_offset.to_be_bytes());
        out.extend_from_slice(&data_offset.to_be_bytes());
        out.extend_from_slice(&name_offset.to_be_bytes());
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        out.extend_from_slice(&row_size.to_be_bytes());
        out.extend_from_slice(&(row_count as u32).to_be_bytes());
        out.extend_from_slice(&schema);
        out.extend_from_slice(&rows);
        out.extend_from_slice(&strings);
        out.extend_from_slice(&data_region);
        out
    }
}

/// Builds a serialized AFS2 (AWB) archive with 2-byte cue ids and 4-byte
/// offsets.
pub struct Afs2Builder {
    alignment: u32,
    files: Vec<(u16, Vec<u8>)>,
}

impl Afs2Builder {
    pub fn new(alignment: u32) -> Self {
        Self {
            alignment,
            files: Vec::new(),
        }
    }

    pub fn file(mut self, cue_id: u16, data: &[u8]) -> Self {
        self.files.push((cue_id, data.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let count = self.files.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"AFS2");
        out.extend_from_slice(&[0x01, 0x04, 0x02, 0x00]); // 4-byte offsets, 2-byte cue ids
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&self.alignment.to_le_bytes());
        for (cue_id, _) in &self.files {
            out.extend_from_slice(&cue_id.to_le_bytes());
        }

        // Offset table: count + 1 entries; payloads start aligned up from
        // their recorded offsets.
        let table_len = 4 * (self.files.len() + 1);
        let mut cursor = (out.len() + table_len) as u32;
        let mut offsets = Vec::with_capacity(self.files.len() + 1);
        for (_, data) in &self.files {
            offsets.push(cursor);
            cursor = align_up(cursor, self.alignment) + data.len() as u32;
        }
        offsets.push(cursor);
        for offset in &offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }

        for (i, (_, data)) in self.files.iter().enumerate() {
            let aligned = align_up(offsets[i], self.alignment);
            out.resize(aligned as usize, 0);
            out.extend_from_slice(data);
        }
        out
    }
}

fn align_up(offset: u32, alignment: u32) -> u32 {
    offset.div_ceil(alignment) * alignment
}
