/// Column Binding Module
///
/// This module computes the fixed row-buffer layout used to receive fetched
/// rows from the provider. Column metadata goes in, a table of per-slot byte
/// offsets comes out; the offsets are computed exactly once at bind time and
/// every later read goes through the table instead of repeating the
/// arithmetic.
///
/// Two binding strategies exist:
/// - `Variant`: every column occupies a uniform tagged-union slot and type
///   interpretation is deferred to conversion time.
/// - `Native`: each slot is sized and typed by the column's declared native
///   type (fast path; text gets a generous fixed capacity and may truncate,
///   which is captured distinctly from success and from NULL).
use crate::core::convert::utf16_to_string;
use crate::core::value::{DbType, LogicalType};
use crate::core::variant::Variant;
use crate::core::{DaxqlError, Result};

/// Fixed capacity in bytes for native-bound text slots.
pub const NATIVE_TEXT_CAPACITY: usize = 4096;

/// Size in bytes of one provider tagged-union slot (a 64-bit VARIANT).
pub const VARIANT_SLOT_SIZE: usize = 24;

/// Per-slot header: status word (u32, padded) + length indicator (u64).
const SLOT_HEADER_SIZE: usize = 16;

/// Raw provider status word values for a fetched slot.
const STATUS_OK: u32 = 0;
const STATUS_ISNULL: u32 = 3;
const STATUS_TRUNCATED: u32 = 4;

/// Describes one column of an executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// 1-based ordinal in the provider's addressing
    pub ordinal: u64,
    /// Sanitized, de-duplicated output name
    pub name: String,
    /// Native type tag reported by the provider
    pub db_type: DbType,
}

impl ColumnDescriptor {
    /// Host logical type this column maps to.
    pub fn logical_type(&self) -> LogicalType {
        self.db_type.logical_type()
    }
}

/// How row buffers are bound to provider columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    /// Uniform tagged-union slots, interpretation deferred to conversion
    Variant,
    /// Slots sized/typed per the declared native column type
    Native,
}

/// Native representation held in a bound slot's value area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    I2,
    I4,
    I8,
    R4,
    R8,
    /// Provider boolean: 16-bit, zero = false
    Bool,
    /// 64-bit integer scaled by 10,000
    Currency,
    /// Automation date (f64 days since 1899-12-30)
    Date,
    /// UTF-16 text with a fixed byte capacity (terminator included)
    WStr { capacity: usize },
    /// Provider tagged union, decoded by the provider layer
    Variant,
}

impl SlotKind {
    /// Chooses the native slot representation for a column type.
    ///
    /// Returns `None` for types that are problematic to bind natively; such
    /// columns are left unbound and read as explicit placeholders so that
    /// the offsets of later columns never shift.
    pub fn for_native(db_type: DbType) -> Option<SlotKind> {
        match db_type {
            DbType::I1 | DbType::UI1 | DbType::I2 | DbType::UI2 => Some(SlotKind::I2),
            DbType::I4 | DbType::UI4 => Some(SlotKind::I4),
            DbType::I8 | DbType::UI8 => Some(SlotKind::I8),
            DbType::R4 => Some(SlotKind::R4),
            DbType::R8 | DbType::Decimal | DbType::Numeric => Some(SlotKind::R8),
            DbType::Bool => Some(SlotKind::Bool),
            DbType::Currency => Some(SlotKind::Currency),
            DbType::Date | DbType::DbDate | DbType::DbTime | DbType::DbTimestamp => {
                Some(SlotKind::Date)
            }
            DbType::Bstr | DbType::Str | DbType::WStr | DbType::Guid => Some(SlotKind::WStr {
                capacity: NATIVE_TEXT_CAPACITY,
            }),
            // Raw binary, UDTs and unrecognized tags are not bound natively
            DbType::Bytes | DbType::Udt | DbType::Unknown(_) => None,
            // Degenerate metadata tags carry no data worth binding
            DbType::Empty | DbType::Null | DbType::Error | DbType::Variant => None,
        }
    }

    /// Byte size of the slot's value area.
    pub fn value_size(&self) -> usize {
        match self {
            SlotKind::I2 | SlotKind::Bool => 2,
            SlotKind::I4 | SlotKind::R4 => 4,
            SlotKind::I8 | SlotKind::R8 | SlotKind::Currency | SlotKind::Date => 8,
            SlotKind::WStr { capacity } => *capacity,
            SlotKind::Variant => VARIANT_SLOT_SIZE,
        }
    }

    /// Raw provider type tag requested for this slot.
    pub fn bind_type(&self) -> u16 {
        match self {
            SlotKind::I2 => DbType::I2.raw(),
            SlotKind::I4 => DbType::I4.raw(),
            SlotKind::I8 => DbType::I8.raw(),
            SlotKind::R4 => DbType::R4.raw(),
            SlotKind::R8 => DbType::R8.raw(),
            SlotKind::Bool => DbType::Bool.raw(),
            SlotKind::Currency => DbType::Currency.raw(),
            SlotKind::Date => DbType::Date.raw(),
            SlotKind::WStr { .. } => DbType::WStr.raw(),
            SlotKind::Variant => DbType::Variant.raw(),
        }
    }
}

/// Interpreted status of a fetched slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Value present and complete
    Ok,
    /// Missing value
    IsNull,
    /// Value present but cut to the slot capacity; the length indicator
    /// still reports the untruncated size
    Truncated,
    /// Provider-side retrieval error for this slot
    Error(u32),
}

impl SlotStatus {
    /// Decodes the raw provider status word.
    pub fn from_raw(raw: u32) -> SlotStatus {
        match raw {
            STATUS_OK => SlotStatus::Ok,
            STATUS_ISNULL => SlotStatus::IsNull,
            STATUS_TRUNCATED => SlotStatus::Truncated,
            other => SlotStatus::Error(other),
        }
    }
}

/// One bound column's place in the row buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSpec {
    /// 0-based host column index
    pub column: usize,
    /// 1-based provider ordinal
    pub ordinal: u64,
    pub kind: SlotKind,
    pub status_offset: usize,
    pub length_offset: usize,
    pub value_offset: usize,
    pub value_size: usize,
}

/// The complete bound layout of one fetched row.
///
/// Slot count and offsets are fixed once the layout is planned and must not
/// change while a cursor iterates over it.
#[derive(Debug, Clone)]
pub struct RowLayout {
    strategy: BindingStrategy,
    /// One entry per output column; `None` marks a deliberately unbound column
    slots: Vec<Option<SlotSpec>>,
    row_size: usize,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

impl RowLayout {
    /// Plans the buffer layout for the given columns.
    ///
    /// Each bound slot occupies a status word, a length indicator and a value
    /// area, laid out contiguously and 8-byte aligned; the total row size is
    /// computed here once and reused for every fetch. Unbound columns consume
    /// no bytes and never shift the offsets of their neighbors.
    pub fn plan(columns: &[ColumnDescriptor], strategy: BindingStrategy) -> RowLayout {
        let mut slots = Vec::with_capacity(columns.len());
        let mut offset = 0usize;

        for (column, descriptor) in columns.iter().enumerate() {
            let kind = match strategy {
                BindingStrategy::Variant => Some(SlotKind::Variant),
                BindingStrategy::Native => SlotKind::for_native(descriptor.db_type),
            };

            match kind {
                None => slots.push(None),
                Some(kind) => {
                    let value_size = kind.value_size();
                    slots.push(Some(SlotSpec {
                        column,
                        ordinal: descriptor.ordinal,
                        kind,
                        status_offset: offset,
                        length_offset: offset + 8,
                        value_offset: offset + SLOT_HEADER_SIZE,
                        value_size,
                    }));
                    offset += SLOT_HEADER_SIZE + align_up(value_size, 8);
                }
            }
        }

        RowLayout {
            strategy,
            slots,
            row_size: offset,
        }
    }

    /// Total buffer size in bytes for one row.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// The strategy this layout was planned with.
    pub fn strategy(&self) -> BindingStrategy {
        self.strategy
    }

    /// Number of output columns (bound and unbound).
    pub fn column_count(&self) -> usize {
        self.slots.len()
    }

    /// The slot for a column, or `None` when the column is unbound.
    pub fn slot(&self, column: usize) -> Option<&SlotSpec> {
        self.slots.get(column).and_then(|s| s.as_ref())
    }

    /// Iterates over the bound slots in column order.
    pub fn bound_slots(&self) -> impl Iterator<Item = &SlotSpec> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    /// Allocates a zeroed buffer matching this layout.
    pub fn alloc_row_buffer(&self) -> Vec<u8> {
        vec![0u8; self.row_size]
    }

    /// Inspects the per-binding creation statuses returned by accessor
    /// creation.
    ///
    /// A single overall failure return does not say which column failed, so
    /// the statuses are checked individually; the first non-OK entry is
    /// surfaced with its column's ordinal.
    pub fn check_binding_statuses(&self, statuses: &[u32]) -> Result<()> {
        let bound: Vec<&SlotSpec> = self.bound_slots().collect();
        if statuses.len() != bound.len() {
            return Err(DaxqlError::Fetch(format!(
                "provider returned {} binding statuses for {} bindings",
                statuses.len(),
                bound.len()
            )));
        }
        for (slot, status) in bound.iter().zip(statuses) {
            if *status != 0 {
                return Err(DaxqlError::Binding {
                    ordinal: slot.ordinal,
                    status: *status,
                });
            }
        }
        Ok(())
    }

    /// Reads a slot from a fetched row buffer.
    ///
    /// Returns `None` for unbound columns; callers emit their placeholder
    /// value instead.
    pub fn slot_view<'a>(&'a self, buffer: &'a [u8], column: usize) -> Option<SlotView<'a>> {
        self.slot(column).map(|spec| SlotView { spec, buffer })
    }
}

/// Read access to one slot of a fetched row buffer.
#[derive(Debug)]
pub struct SlotView<'a> {
    spec: &'a SlotSpec,
    buffer: &'a [u8],
}

impl<'a> SlotView<'a> {
    /// The slot's layout entry.
    pub fn spec(&self) -> &SlotSpec {
        self.spec
    }

    /// Raw status word as written by the provider.
    pub fn raw_status(&self) -> u32 {
        let off = self.spec.status_offset;
        u32::from_ne_bytes(self.buffer[off..off + 4].try_into().unwrap())
    }

    /// Interpreted slot status.
    pub fn status(&self) -> SlotStatus {
        SlotStatus::from_raw(self.raw_status())
    }

    /// The provider's length indicator for this slot.
    ///
    /// For truncated text this still reports the full untruncated byte
    /// length, which is how callers learn how much data was lost.
    pub fn length(&self) -> u64 {
        let off = self.spec.length_offset;
        u64::from_ne_bytes(self.buffer[off..off + 8].try_into().unwrap())
    }

    /// The slot's value area.
    pub fn value_bytes(&self) -> &[u8] {
        &self.buffer[self.spec.value_offset..self.spec.value_offset + self.spec.value_size]
    }

    /// Decodes a native-typed slot's value area into a [`Variant`].
    ///
    /// NULL-status slots decode to `Variant::Null` and error-status slots to
    /// `Variant::Error` without touching the value area. Tagged-union slots
    /// are decoded by the provider layer, not here.
    pub fn decode(&self) -> Result<Variant> {
        match self.status() {
            SlotStatus::IsNull => return Ok(Variant::Null),
            SlotStatus::Error(raw) => return Ok(Variant::Error(raw as i32)),
            SlotStatus::Ok | SlotStatus::Truncated => {}
        }

        let bytes = self.value_bytes();
        let variant = match self.spec.kind {
            SlotKind::I2 => Variant::I2(i16::from_ne_bytes(bytes[..2].try_into().unwrap())),
            SlotKind::I4 => Variant::I4(i32::from_ne_bytes(bytes[..4].try_into().unwrap())),
            SlotKind::I8 => Variant::I8(i64::from_ne_bytes(bytes[..8].try_into().unwrap())),
            SlotKind::R4 => Variant::R4(f32::from_ne_bytes(bytes[..4].try_into().unwrap())),
            SlotKind::R8 => Variant::R8(f64::from_ne_bytes(bytes[..8].try_into().unwrap())),
            SlotKind::Bool => {
                Variant::Bool(i16::from_ne_bytes(bytes[..2].try_into().unwrap()) != 0)
            }
            SlotKind::Currency => {
                Variant::Currency(i64::from_ne_bytes(bytes[..8].try_into().unwrap()))
            }
            SlotKind::Date => Variant::Date(f64::from_ne_bytes(bytes[..8].try_into().unwrap())),
            SlotKind::WStr { capacity } => {
                // The length indicator is a byte count excluding the
                // terminator; a truncated value reports its full length, so
                // cap the read at what actually fits in the slot.
                let byte_len = (self.length() as usize).min(capacity.saturating_sub(2));
                let mut units: Vec<u16> = bytes[..byte_len & !1]
                    .chunks_exact(2)
                    .map(|pair| u16::from_ne_bytes(pair.try_into().unwrap()))
                    .collect();
                if let Some(nul) = units.iter().position(|&u| u == 0) {
                    units.truncate(nul);
                }
                Variant::Text(utf16_to_string(&units))
            }
            SlotKind::Variant => {
                return Err(DaxqlError::Convert(
                    "tagged-union slots must be decoded by the provider layer".to_string(),
                ))
            }
        };
        Ok(variant)
    }
}

/// Write access to one slot of a row buffer.
///
/// The provider fills buffers on Windows; this writer exists for the
/// in-memory row sources used by tests and diagnostics.
#[derive(Debug)]
pub struct SlotWriter<'a> {
    spec: SlotSpec,
    buffer: &'a mut [u8],
}

impl<'a> SlotWriter<'a> {
    /// Creates a writer for a column's slot, if it is bound.
    pub fn new(layout: &RowLayout, buffer: &'a mut [u8], column: usize) -> Option<SlotWriter<'a>> {
        layout.slot(column).cloned().map(|spec| SlotWriter { spec, buffer })
    }

    /// Writes a NULL status.
    pub fn write_null(&mut self) {
        self.write_header(STATUS_ISNULL, 0);
    }

    /// Writes an error status word.
    pub fn write_error(&mut self, raw_status: u32) {
        self.write_header(raw_status, 0);
    }

    /// Writes a value, setting status OK and the length indicator.
    ///
    /// Text longer than the slot capacity is cut to fit, the status becomes
    /// `Truncated` and the length indicator keeps the untruncated byte count.
    pub fn write_variant(&mut self, value: &Variant) {
        match (self.spec.kind, value) {
            (_, Variant::Null) | (_, Variant::Empty) => self.write_null(),
            (SlotKind::I2, Variant::I2(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::I4, Variant::I4(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::I8, Variant::I8(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::R4, Variant::R4(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::R8, Variant::R8(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::Bool, Variant::Bool(v)) => {
                let raw: i16 = if *v { -1 } else { 0 };
                self.write_value(&raw.to_ne_bytes())
            }
            (SlotKind::Currency, Variant::Currency(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::Date, Variant::Date(v)) => self.write_value(&v.to_ne_bytes()),
            (SlotKind::WStr { capacity }, Variant::Text(s)) => {
                let units: Vec<u16> = s.encode_utf16().collect();
                let full_bytes = units.len() * 2;
                let fit_units = units.len().min((capacity.saturating_sub(2)) / 2);
                let truncated = fit_units < units.len();

                let value_off = self.spec.value_offset;
                for (i, unit) in units[..fit_units].iter().enumerate() {
                    let off = value_off + i * 2;
                    self.buffer[off..off + 2].copy_from_slice(&unit.to_ne_bytes());
                }
                // terminator
                let term_off = value_off + fit_units * 2;
                self.buffer[term_off..term_off + 2].copy_from_slice(&0u16.to_ne_bytes());

                let status = if truncated { STATUS_TRUNCATED } else { STATUS_OK };
                self.write_header(status, full_bytes as u64);
            }
            (kind, value) => {
                // Kind/value mismatch has no sensible representation; surface
                // it as a provider-style conversion failure status
                tracing::warn!(?kind, tag = value.tag_name(), "slot kind mismatch");
                self.write_error(2);
            }
        }
    }

    fn write_value(&mut self, bytes: &[u8]) {
        let off = self.spec.value_offset;
        self.buffer[off..off + bytes.len()].copy_from_slice(bytes);
        self.write_header(STATUS_OK, bytes.len() as u64);
    }

    fn write_header(&mut self, status: u32, length: u64) {
        let s = self.spec.status_offset;
        self.buffer[s..s + 4].copy_from_slice(&status.to_ne_bytes());
        let l = self.spec.length_offset;
        self.buffer[l..l + 8].copy_from_slice(&length.to_ne_bytes());
    }
}
