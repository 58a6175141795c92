//! The fixed field catalogue. Each field has a stable integer id, a data
//! type, and an on-wire size in bytes; `--fields` on the CLI and the
//! aggregation/sort key machinery all resolve through this table.

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct FieldId(pub u16);

/// `Address` holds either an IPv4 or an IPv6 value, always canonicalized to
/// a 16-byte buffer before comparison or indexing: rather than leave it
/// ambiguous whether a 4-byte IPv4 value may be compared against a 16-byte
/// lookup buffer, every address is stored canonically as its IPv4-mapped
/// IPv6 form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Address,
    U8,
    U16,
    U32,
    U64,
}

impl DataType {
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::Address => 16,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::U64 => 8,
        }
    }

    pub fn is_address(self) -> bool {
        matches!(self, DataType::Address)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldCatalogEntry {
    pub id: FieldId,
    pub name: &'static str,
    pub data_type: DataType,
}

/// The fields a flow record exposes. Small and fixed by design — this
/// mirrors the narrow set of fields a typical query needs
/// (src/dst address, ports, protocol, counters, timestamps).
pub const FIELD_CATALOG: &[FieldCatalogEntry] = &[
    FieldCatalogEntry { id: FieldId(0), name: "srcaddr", data_type: DataType::Address },
    FieldCatalogEntry { id: FieldId(1), name: "dstaddr", data_type: DataType::Address },
    FieldCatalogEntry { id: FieldId(2), name: "srcport", data_type: DataType::U16 },
    FieldCatalogEntry { id: FieldId(3), name: "dstport", data_type: DataType::U16 },
    FieldCatalogEntry { id: FieldId(4), name: "proto", data_type: DataType::U8 },
    FieldCatalogEntry { id: FieldId(5), name: "tcpflags", data_type: DataType::U8 },
    FieldCatalogEntry { id: FieldId(6), name: "packets", data_type: DataType::U64 },
    FieldCatalogEntry { id: FieldId(7), name: "bytes", data_type: DataType::U64 },
    FieldCatalogEntry { id: FieldId(8), name: "first", data_type: DataType::U64 },
    FieldCatalogEntry { id: FieldId(9), name: "last", data_type: DataType::U64 },
];

pub fn by_name(name: &str) -> Option<FieldCatalogEntry> {
    FIELD_CATALOG.iter().copied().find(|f| f.name == name)
}

pub fn by_id(id: FieldId) -> Option<FieldCatalogEntry> {
    FIELD_CATALOG.iter().copied().find(|f| f.id == id)
}
