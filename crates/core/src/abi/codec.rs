use super::{ShipAbi, StructDef, VariantDef};
use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tevm_indexer_types::{public_key_to_string, signature_to_string, KeyKind, Name};

/// Milliseconds between the UNIX epoch and the Antelope block timestamp
/// epoch (2000-01-01T00:00:00.000 UTC).
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
/// Width of one `block_timestamp_type` slot.
const BLOCK_INTERVAL_MS: i64 = 500;

const MAX_ALIAS_DEPTH: usize = 32;

const BUILTIN_TYPES: &[&str] = &[
    "bool",
    "uint8",
    "uint16",
    "uint32",
    "uint64",
    "uint128",
    "int8",
    "int16",
    "int32",
    "int64",
    "int128",
    "varuint32",
    "varint32",
    "float32",
    "float64",
    "float128",
    "time_point",
    "time_point_sec",
    "block_timestamp_type",
    "name",
    "bytes",
    "string",
    "checksum160",
    "checksum256",
    "checksum512",
    "public_key",
    "signature",
    "symbol",
    "symbol_code",
    "asset",
];

fn is_builtin(ty: &str) -> bool {
    BUILTIN_TYPES.contains(&ty)
}

fn has_suffix(ty: &str) -> bool {
    ty.ends_with("[]") || ty.ends_with('?') || ty.ends_with('$')
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("unsupported variant `{tag}` for `{ty}`")]
    UnsupportedVariant { ty: String, tag: String },

    #[error("{len} trailing byte(s) after decoding `{ty}`")]
    TrailingBytes { ty: String, len: usize },

    #[error("decoding `{ty}`: unexpected end of input at offset {offset}")]
    Eof { ty: String, offset: usize },

    #[error("decoding `{ty}` at offset {offset}: {reason}")]
    Invalid {
        ty: String,
        offset: usize,
        reason: String,
    },

    #[error("encoding `{ty}`: {reason}")]
    Encode { ty: String, reason: String },
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes(b.try_into().unwrap()))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn u128(&mut self) -> Option<u128> {
        self.take(16)
            .map(|b| u128::from_le_bytes(b.try_into().unwrap()))
    }

    fn f32(&mut self) -> Option<f32> {
        self.take(4).map(|b| f32::from_le_bytes(b.try_into().unwrap()))
    }

    fn f64(&mut self) -> Option<f64> {
        self.take(8).map(|b| f64::from_le_bytes(b.try_into().unwrap()))
    }

    fn varuint32(&mut self) -> Option<u32> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return None;
            }
        }
        u32::try_from(result).ok()
    }

    fn varint32(&mut self) -> Option<i32> {
        let raw = self.varuint32()?;
        // Zigzag.
        Some(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }
}

fn write_varuint32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn time_point_string(micros: i64) -> Option<String> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
}

fn parse_time_point(raw: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc().timestamp_micros())
}

fn block_timestamp_string(slot: u32) -> Option<String> {
    let millis = BLOCK_TIMESTAMP_EPOCH_MS + i64::from(slot) * BLOCK_INTERVAL_MS;
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
}

fn symbol_code_string(raw: u64) -> String {
    let mut code = String::new();
    let mut v = raw;
    while v > 0 {
        code.push((v & 0xff) as u8 as char);
        v >>= 8;
    }
    code
}

fn asset_string(amount: i64, symbol_raw: u64) -> String {
    let precision = (symbol_raw & 0xff) as u32;
    let code = symbol_code_string(symbol_raw >> 8);
    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();
    let scale = 10u64.pow(precision);
    if precision == 0 {
        format!("{sign}{magnitude} {code}")
    } else {
        format!(
            "{sign}{}.{:0width$} {code}",
            magnitude / scale,
            magnitude % scale,
            width = precision as usize
        )
    }
}

/// Tagged-union binary codec over a runtime-loaded [`ShipAbi`].
///
/// Decoded values are dynamic (`serde_json::Value`); 64-bit integers stay
/// numeric, 128-bit integers and binary blobs become strings.
#[derive(Debug, Clone)]
pub struct Codec {
    aliases: HashMap<String, String>,
    structs: HashMap<String, StructDef>,
    variants: HashMap<String, VariantDef>,
    tables: HashMap<String, String>,
    actions: HashMap<String, String>,
}

impl Codec {
    pub fn new(abi: ShipAbi) -> Self {
        Self {
            aliases: abi
                .types
                .into_iter()
                .map(|alias| (alias.new_type_name, alias.type_name))
                .collect(),
            structs: abi
                .structs
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
            variants: abi
                .variants
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
            tables: abi
                .tables
                .into_iter()
                .map(|def| (def.name, def.type_name))
                .collect(),
            actions: abi
                .actions
                .into_iter()
                .map(|def| (def.name, def.type_name))
                .collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CodecError> {
        Ok(Self::new(ShipAbi::from_json(raw)?))
    }

    /// Row type backing a table, e.g. `global` -> `global_state`.
    pub fn table_row_type(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Payload type of a contract action, e.g. `transfer` -> `transfer`.
    pub fn action_payload_type(&self, action: &str) -> Option<&str> {
        self.actions.get(action).map(String::as_str)
    }

    pub fn has_type(&self, ty: &str) -> bool {
        let resolved = self.resolve_alias(ty);
        is_builtin(&resolved)
            || self.structs.contains_key(resolved.as_ref())
            || self.variants.contains_key(resolved.as_ref())
    }

    /// Decodes `bytes` as `ty`, ignoring any unread trailing bytes.
    pub fn decode(&self, ty: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut reader = ByteReader::new(bytes);
        self.read_value(ty, &mut reader)
    }

    /// Decodes `bytes` as `ty` and fails with [`CodecError::TrailingBytes`]
    /// unless the whole buffer was consumed. Used on all top-level decodes.
    pub fn decode_checked(&self, ty: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let value = self.read_value(ty, &mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::TrailingBytes {
                ty: ty.to_string(),
                len: reader.remaining(),
            });
        }
        Ok(value)
    }

    pub fn encode(&self, ty: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.write_value(ty, value, &mut out)?;
        Ok(out)
    }

    fn resolve_alias<'a>(&'a self, ty: &'a str) -> std::borrow::Cow<'a, str> {
        let mut current = ty;
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        std::borrow::Cow::Borrowed(current)
    }

    fn read_value(&self, ty: &str, reader: &mut ByteReader<'_>) -> Result<Value, CodecError> {
        if let Some(inner) = ty.strip_suffix("[]") {
            let count = reader.varuint32().ok_or_else(|| self.eof(ty, reader))?;
            let mut items = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                items.push(self.read_value(inner, reader)?);
            }
            return Ok(Value::Array(items));
        }
        if let Some(inner) = ty.strip_suffix('?') {
            return match reader.u8().ok_or_else(|| self.eof(ty, reader))? {
                0 => Ok(Value::Null),
                1 => self.read_value(inner, reader),
                other => Err(self.invalid(ty, reader, format!("optional flag {other}"))),
            };
        }
        if let Some(inner) = ty.strip_suffix('$') {
            if reader.is_empty() {
                return Ok(Value::Null);
            }
            return self.read_value(inner, reader);
        }

        let resolved = self.resolve_alias(ty).into_owned();
        if resolved != ty && has_suffix(&resolved) {
            return self.read_value(&resolved, reader);
        }
        if let Some(value) = self.read_builtin(&resolved, reader)? {
            return Ok(value);
        }
        if let Some(def) = self.structs.get(&resolved) {
            let mut map = Map::new();
            self.read_struct(def, reader, &mut map)?;
            return Ok(Value::Object(map));
        }
        if let Some(def) = self.variants.get(&resolved) {
            return self.read_variant(def, reader);
        }
        Err(CodecError::UnknownType(resolved))
    }

    fn read_struct(
        &self,
        def: &StructDef,
        reader: &mut ByteReader<'_>,
        out: &mut Map<String, Value>,
    ) -> Result<(), CodecError> {
        if !def.base.is_empty() {
            let base_name = self.resolve_alias(&def.base).into_owned();
            let base = self
                .structs
                .get(&base_name)
                .ok_or(CodecError::UnknownType(base_name))?;
            self.read_struct(base, reader, out)?;
        }
        for field in &def.fields {
            // Binary extension fields may legitimately be absent at the end
            // of the buffer.
            if field.type_name.ends_with('$') && reader.is_empty() {
                break;
            }
            let value = self.read_value(&field.type_name, reader)?;
            out.insert(field.name.clone(), value);
        }
        Ok(())
    }

    fn read_variant(
        &self,
        def: &VariantDef,
        reader: &mut ByteReader<'_>,
    ) -> Result<Value, CodecError> {
        let index = reader
            .varuint32()
            .ok_or_else(|| self.eof(&def.name, reader))? as usize;
        let inner = def.types.get(index).ok_or_else(|| {
            self.invalid(
                &def.name,
                reader,
                format!("variant index {index} out of range ({} types)", def.types.len()),
            )
        })?;
        let value = self.read_value(inner, reader)?;
        Ok(Value::Array(vec![Value::String(inner.clone()), value]))
    }

    fn read_builtin(
        &self,
        ty: &str,
        reader: &mut ByteReader<'_>,
    ) -> Result<Option<Value>, CodecError> {
        let eof = |r: &ByteReader<'_>| CodecError::Eof {
            ty: ty.to_string(),
            offset: r.pos,
        };
        let value = match ty {
            "bool" => match reader.u8().ok_or_else(|| eof(reader))? {
                0 => Value::Bool(false),
                _ => Value::Bool(true),
            },
            "uint8" => reader.u8().ok_or_else(|| eof(reader))?.into(),
            "uint16" => reader.u16().ok_or_else(|| eof(reader))?.into(),
            "uint32" => reader.u32().ok_or_else(|| eof(reader))?.into(),
            "varuint32" => reader.varuint32().ok_or_else(|| eof(reader))?.into(),
            "uint64" => reader.u64().ok_or_else(|| eof(reader))?.into(),
            "uint128" => Value::String(reader.u128().ok_or_else(|| eof(reader))?.to_string()),
            "int8" => (reader.u8().ok_or_else(|| eof(reader))? as i8).into(),
            "int16" => (reader.u16().ok_or_else(|| eof(reader))? as i16).into(),
            "int32" => (reader.u32().ok_or_else(|| eof(reader))? as i32).into(),
            "int64" => (reader.u64().ok_or_else(|| eof(reader))? as i64).into(),
            "int128" => {
                Value::String((reader.u128().ok_or_else(|| eof(reader))? as i128).to_string())
            }
            "varint32" => reader.varint32().ok_or_else(|| eof(reader))?.into(),
            "float32" => {
                let raw = reader.f32().ok_or_else(|| eof(reader))?;
                serde_json::Number::from_f64(raw as f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            }
            "float64" => {
                let raw = reader.f64().ok_or_else(|| eof(reader))?;
                serde_json::Number::from_f64(raw)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            }
            "float128" => Value::String(hex::encode(reader.take(16).ok_or_else(|| eof(reader))?)),
            "time_point" => {
                let micros = reader.u64().ok_or_else(|| eof(reader))? as i64;
                Value::String(time_point_string(micros).ok_or_else(|| {
                    self.invalid(ty, reader, format!("time point {micros} out of range"))
                })?)
            }
            "time_point_sec" => {
                let secs = reader.u32().ok_or_else(|| eof(reader))?;
                Value::String(
                    time_point_string(i64::from(secs) * 1_000_000)
                        .expect("u32 seconds is in range"),
                )
            }
            "block_timestamp_type" => {
                let slot = reader.u32().ok_or_else(|| eof(reader))?;
                Value::String(block_timestamp_string(slot).expect("u32 slot is in range"))
            }
            "name" => Value::String(Name(reader.u64().ok_or_else(|| eof(reader))?).to_string()),
            "bytes" => {
                let len = reader.varuint32().ok_or_else(|| eof(reader))? as usize;
                Value::String(hex::encode(reader.take(len).ok_or_else(|| eof(reader))?))
            }
            "string" => {
                let len = reader.varuint32().ok_or_else(|| eof(reader))? as usize;
                let raw = reader.take(len).ok_or_else(|| eof(reader))?;
                Value::String(String::from_utf8_lossy(raw).into_owned())
            }
            "checksum160" => {
                Value::String(hex::encode(reader.take(20).ok_or_else(|| eof(reader))?))
            }
            "checksum256" => {
                Value::String(hex::encode(reader.take(32).ok_or_else(|| eof(reader))?))
            }
            "checksum512" => {
                Value::String(hex::encode(reader.take(64).ok_or_else(|| eof(reader))?))
            }
            "public_key" => {
                let tag = reader.u8().ok_or_else(|| eof(reader))?;
                let kind = KeyKind::from_tag(tag)
                    .ok_or_else(|| self.invalid(ty, reader, format!("key type {tag}")))?;
                let payload = reader.take(33).ok_or_else(|| eof(reader))?;
                Value::String(public_key_to_string(kind, payload))
            }
            "signature" => {
                let tag = reader.u8().ok_or_else(|| eof(reader))?;
                let kind = KeyKind::from_tag(tag)
                    .ok_or_else(|| self.invalid(ty, reader, format!("signature type {tag}")))?;
                let payload = reader.take(65).ok_or_else(|| eof(reader))?;
                Value::String(signature_to_string(kind, payload))
            }
            "symbol_code" => {
                Value::String(symbol_code_string(reader.u64().ok_or_else(|| eof(reader))?))
            }
            "symbol" => {
                let raw = reader.u64().ok_or_else(|| eof(reader))?;
                Value::String(format!("{},{}", raw & 0xff, symbol_code_string(raw >> 8)))
            }
            "asset" => {
                let amount = reader.u64().ok_or_else(|| eof(reader))? as i64;
                let symbol = reader.u64().ok_or_else(|| eof(reader))?;
                Value::String(asset_string(amount, symbol))
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn write_value(&self, ty: &str, value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let encode_err = |reason: String| CodecError::Encode {
            ty: ty.to_string(),
            reason,
        };
        if let Some(inner) = ty.strip_suffix("[]") {
            let items = value
                .as_array()
                .ok_or_else(|| encode_err("expected an array".to_string()))?;
            write_varuint32(out, items.len() as u32);
            for item in items {
                self.write_value(inner, item, out)?;
            }
            return Ok(());
        }
        if let Some(inner) = ty.strip_suffix('?') {
            if value.is_null() {
                out.push(0);
            } else {
                out.push(1);
                self.write_value(inner, value, out)?;
            }
            return Ok(());
        }
        if let Some(inner) = ty.strip_suffix('$') {
            if !value.is_null() {
                self.write_value(inner, value, out)?;
            }
            return Ok(());
        }

        let resolved = self.resolve_alias(ty).into_owned();
        if resolved != ty && has_suffix(&resolved) {
            return self.write_value(&resolved, value, out);
        }
        if self.write_builtin(&resolved, value, out)? {
            return Ok(());
        }
        if let Some(def) = self.structs.get(&resolved) {
            return self.write_struct(def, value, out);
        }
        if let Some(def) = self.variants.get(&resolved) {
            return self.write_variant(def, value, out);
        }
        Err(CodecError::UnknownType(resolved))
    }

    fn write_struct(
        &self,
        def: &StructDef,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let object = value.as_object().ok_or_else(|| CodecError::Encode {
            ty: def.name.clone(),
            reason: "expected an object".to_string(),
        })?;
        if !def.base.is_empty() {
            let base_name = self.resolve_alias(&def.base).into_owned();
            let base = self
                .structs
                .get(&base_name)
                .ok_or(CodecError::UnknownType(base_name))?;
            self.write_struct(base, value, out)?;
        }
        for field in &def.fields {
            match object.get(&field.name) {
                Some(field_value) => self.write_value(&field.type_name, field_value, out)?,
                None if field.type_name.ends_with('$') => break,
                None => {
                    return Err(CodecError::Encode {
                        ty: def.name.clone(),
                        reason: format!("missing field `{}`", field.name),
                    })
                }
            }
        }
        Ok(())
    }

    fn write_variant(
        &self,
        def: &VariantDef,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let parts = value.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
            CodecError::Encode {
                ty: def.name.clone(),
                reason: "expected a [tag, value] pair".to_string(),
            }
        })?;
        let tag = parts[0].as_str().ok_or_else(|| CodecError::Encode {
            ty: def.name.clone(),
            reason: "variant tag must be a string".to_string(),
        })?;
        let index = def
            .types
            .iter()
            .position(|t| t == tag)
            .ok_or_else(|| CodecError::UnsupportedVariant {
                ty: def.name.clone(),
                tag: tag.to_string(),
            })?;
        write_varuint32(out, index as u32);
        self.write_value(tag, &parts[1], out)
    }

    fn write_builtin(
        &self,
        ty: &str,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<bool, CodecError> {
        let encode_err = |reason: String| CodecError::Encode {
            ty: ty.to_string(),
            reason,
        };
        let as_u64 = |v: &Value| -> Result<u64, CodecError> {
            match v {
                Value::Number(n) => n.as_u64().ok_or_else(|| {
                    encode_err(format!("{n} is not an unsigned integer"))
                }),
                Value::String(s) => s
                    .parse()
                    .map_err(|_| encode_err(format!("`{s}` is not an unsigned integer"))),
                other => Err(encode_err(format!("{other} is not an unsigned integer"))),
            }
        };
        let as_i64 = |v: &Value| -> Result<i64, CodecError> {
            match v {
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| encode_err(format!("{n} is not an integer"))),
                Value::String(s) => s
                    .parse()
                    .map_err(|_| encode_err(format!("`{s}` is not an integer"))),
                other => Err(encode_err(format!("{other} is not an integer"))),
            }
        };
        match ty {
            "bool" => out.push(u8::from(
                value
                    .as_bool()
                    .ok_or_else(|| encode_err("expected a bool".to_string()))?,
            )),
            "uint8" => out.push(
                u8::try_from(as_u64(value)?)
                    .map_err(|_| encode_err("out of range for uint8".to_string()))?,
            ),
            "uint16" => out.extend_from_slice(
                &u16::try_from(as_u64(value)?)
                    .map_err(|_| encode_err("out of range for uint16".to_string()))?
                    .to_le_bytes(),
            ),
            "uint32" => out.extend_from_slice(
                &u32::try_from(as_u64(value)?)
                    .map_err(|_| encode_err("out of range for uint32".to_string()))?
                    .to_le_bytes(),
            ),
            "uint64" => out.extend_from_slice(&as_u64(value)?.to_le_bytes()),
            "int8" => out.push(
                i8::try_from(as_i64(value)?)
                    .map_err(|_| encode_err("out of range for int8".to_string()))?
                    as u8,
            ),
            "int16" => out.extend_from_slice(
                &i16::try_from(as_i64(value)?)
                    .map_err(|_| encode_err("out of range for int16".to_string()))?
                    .to_le_bytes(),
            ),
            "int32" => out.extend_from_slice(
                &i32::try_from(as_i64(value)?)
                    .map_err(|_| encode_err("out of range for int32".to_string()))?
                    .to_le_bytes(),
            ),
            "int64" => out.extend_from_slice(&as_i64(value)?.to_le_bytes()),
            "varuint32" => write_varuint32(
                out,
                u32::try_from(as_u64(value)?)
                    .map_err(|_| encode_err("out of range for varuint32".to_string()))?,
            ),
            "name" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a name string".to_string()))?;
                let name: Name = text
                    .parse()
                    .map_err(|err| encode_err(format!("bad name: {err}")))?;
                out.extend_from_slice(&name.as_u64().to_le_bytes());
            }
            "bytes" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a hex string".to_string()))?;
                let raw =
                    hex::decode(text).map_err(|err| encode_err(format!("bad hex: {err}")))?;
                write_varuint32(out, raw.len() as u32);
                out.extend_from_slice(&raw);
            }
            "string" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a string".to_string()))?;
                write_varuint32(out, text.len() as u32);
                out.extend_from_slice(text.as_bytes());
            }
            "checksum160" | "checksum256" | "checksum512" => {
                let expected = match ty {
                    "checksum160" => 20,
                    "checksum256" => 32,
                    _ => 64,
                };
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a hex string".to_string()))?;
                let raw =
                    hex::decode(text).map_err(|err| encode_err(format!("bad hex: {err}")))?;
                if raw.len() != expected {
                    return Err(encode_err(format!(
                        "expected {expected} bytes, got {}",
                        raw.len()
                    )));
                }
                out.extend_from_slice(&raw);
            }
            "float64" => {
                let raw = value
                    .as_f64()
                    .ok_or_else(|| encode_err("expected a float".to_string()))?;
                out.extend_from_slice(&raw.to_le_bytes());
            }
            "time_point" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a time string".to_string()))?;
                let micros = parse_time_point(text)
                    .ok_or_else(|| encode_err(format!("`{text}` is not a time point")))?;
                out.extend_from_slice(&micros.to_le_bytes());
            }
            "time_point_sec" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a time string".to_string()))?;
                let secs = parse_time_point(text)
                    .map(|micros| micros / 1_000_000)
                    .and_then(|secs| u32::try_from(secs).ok())
                    .ok_or_else(|| encode_err(format!("`{text}` is not a time point")))?;
                out.extend_from_slice(&secs.to_le_bytes());
            }
            "block_timestamp_type" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| encode_err("expected a time string".to_string()))?;
                let slot = parse_time_point(text)
                    .map(|micros| (micros / 1_000 - BLOCK_TIMESTAMP_EPOCH_MS) / BLOCK_INTERVAL_MS)
                    .and_then(|slot| u32::try_from(slot).ok())
                    .ok_or_else(|| encode_err(format!("`{text}` is not a block timestamp")))?;
                out.extend_from_slice(&slot.to_le_bytes());
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn eof(&self, ty: &str, reader: &ByteReader<'_>) -> CodecError {
        CodecError::Eof {
            ty: ty.to_string(),
            offset: reader.pos,
        }
    }

    fn invalid(&self, ty: &str, reader: &ByteReader<'_>, reason: String) -> CodecError {
        CodecError::Invalid {
            ty: ty.to_string(),
            offset: reader.pos,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_ABI: &str = r#"{
        "version": "eosio::abi/1.1",
        "types": [
            {"new_type_name": "account_name", "type": "name"},
            {"new_type_name": "positions", "type": "block_position[]"}
        ],
        "structs": [
            {
                "name": "block_position", "base": "",
                "fields": [
                    {"name": "block_num", "type": "uint32"},
                    {"name": "block_id", "type": "checksum256"}
                ]
            },
            {
                "name": "get_blocks_request_v0", "base": "",
                "fields": [
                    {"name": "start_block_num", "type": "uint32"},
                    {"name": "end_block_num", "type": "uint32"},
                    {"name": "max_messages_in_flight", "type": "uint32"},
                    {"name": "have_positions", "type": "positions"},
                    {"name": "irreversible_only", "type": "bool"},
                    {"name": "fetch_block", "type": "bool"},
                    {"name": "fetch_traces", "type": "bool"},
                    {"name": "fetch_deltas", "type": "bool"}
                ]
            },
            {
                "name": "base_row", "base": "",
                "fields": [{"name": "owner", "type": "account_name"}]
            },
            {
                "name": "extended_row", "base": "base_row",
                "fields": [
                    {"name": "balance", "type": "asset"},
                    {"name": "note", "type": "string$"}
                ]
            }
        ],
        "variants": [
            {"name": "request", "types": ["get_blocks_request_v0"]},
            {"name": "row", "types": ["base_row", "extended_row"]}
        ],
        "tables": [{"name": "accounts", "type": "extended_row"}],
        "actions": [{"name": "transfer", "type": "base_row"}]
    }"#;

    fn codec() -> Codec {
        Codec::from_json(TEST_ABI).unwrap()
    }

    #[test]
    fn decodes_struct_with_base_and_extension() {
        // owner = "eosio" (8 bytes), balance = 1.0000 TLOS, note absent.
        let mut bytes = 0x5530ea0000000000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&10_000u64.to_le_bytes());
        let mut symbol = vec![4u8];
        symbol.extend_from_slice(b"TLOS");
        symbol.extend_from_slice(&[0, 0, 0]);
        bytes.extend_from_slice(&symbol);

        let value = codec().decode_checked("extended_row", &bytes).unwrap();
        assert_eq!(
            value,
            json!({"owner": "eosio", "balance": "1.0000 TLOS"})
        );
    }

    #[test]
    fn variant_decodes_to_tagged_pair() {
        // Variant index 0 -> base_row.
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&0x5530ea0000000000u64.to_le_bytes());
        let value = codec().decode_checked("row", &bytes).unwrap();
        assert_eq!(value, json!(["base_row", {"owner": "eosio"}]));
    }

    #[test]
    fn trailing_bytes_are_fatal_in_checked_mode() {
        let mut bytes = 0x5530ea0000000000u64.to_le_bytes().to_vec();
        bytes.push(0xff);
        let err = codec().decode_checked("base_row", &bytes).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { len: 1, .. }));
        // The lenient mode tolerates the same buffer.
        assert!(codec().decode("base_row", &bytes).is_ok());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(matches!(
            codec().decode("no_such_type", &[]),
            Err(CodecError::UnknownType(_))
        ));
    }

    #[test]
    fn truncated_input_is_eof() {
        assert!(matches!(
            codec().decode("base_row", &[1, 2, 3]),
            Err(CodecError::Eof { .. })
        ));
    }

    #[test]
    fn encodes_block_request_variant() {
        let request = json!(["get_blocks_request_v0", {
            "start_block_num": 100,
            "end_block_num": 4294967295u32,
            "max_messages_in_flight": 1000,
            "have_positions": [{"block_num": 99, "block_id": "ab".repeat(32)}],
            "irreversible_only": false,
            "fetch_block": true,
            "fetch_traces": true,
            "fetch_deltas": true
        }]);
        let bytes = codec().encode("request", &request).unwrap();
        // Tag + 3 u32 + one position (u32 + checksum256) + 4 bools.
        assert_eq!(bytes.len(), 1 + 12 + 1 + 36 + 4);
        assert_eq!(bytes[0], 0);
        let decoded = codec().decode_checked("request", &bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn encode_rejects_unknown_variant_tag() {
        let err = codec()
            .encode("request", &json!(["get_status_request_v0", {}]))
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVariant { .. }));
    }

    #[test]
    fn alias_chain_resolves() {
        let bytes = 0x5530ea0000000000u64.to_le_bytes();
        let value = codec().decode_checked("account_name", &bytes).unwrap();
        assert_eq!(value, json!("eosio"));
    }

    #[test]
    fn varuint_roundtrip_boundaries() {
        for value in [0u32, 1, 127, 128, 16_383, 16_384, u32::MAX] {
            let mut out = Vec::new();
            write_varuint32(&mut out, value);
            let mut reader = ByteReader::new(&out);
            assert_eq!(reader.varuint32(), Some(value));
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn block_timestamp_epoch() {
        assert_eq!(
            block_timestamp_string(0).unwrap(),
            "2000-01-01T00:00:00.000"
        );
        assert_eq!(
            block_timestamp_string(2).unwrap(),
            "2000-01-01T00:00:01.000"
        );
    }

    #[test]
    fn table_and_action_lookups() {
        let codec = codec();
        assert_eq!(codec.table_row_type("accounts"), Some("extended_row"));
        assert_eq!(codec.action_payload_type("transfer"), Some("base_row"));
        assert_eq!(codec.table_row_type("missing"), None);
    }
}
