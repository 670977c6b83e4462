//! Table context for calculating index and row sizes.

use crate::tables::{CodedIndexKind, TableId};

/// Context for reading/writing metadata tables.
/// Tracks heap sizes and row counts to determine index widths.
#[derive(Debug, Clone)]
pub struct TableContext {
    /// HeapSizes byte from tables header.
    pub heap_sizes: u8,
    /// Row counts for each table (indexed by TableId).
    pub row_counts: [u32; 64],
}

impl TableContext {
    /// Create a new table context.
    #[must_use]
    pub fn new(heap_sizes: u8, row_counts: [u32; 64]) -> Self {
        Self {
            heap_sizes,
            row_counts,
        }
    }

    /// Check if #Strings heap uses 4-byte indices.
    #[must_use]
    pub fn wide_string_indices(&self) -> bool {
        self.heap_sizes & 0x01 != 0
    }

    /// Check if #GUID heap uses 4-byte indices.
    #[must_use]
    pub fn wide_guid_indices(&self) -> bool {
        self.heap_sizes & 0x02 != 0
    }

    /// Check if #Blob heap uses 4-byte indices.
    #[must_use]
    pub fn wide_blob_indices(&self) -> bool {
        self.heap_sizes & 0x04 != 0
    }

    fn string(&self) -> usize {
        if self.wide_string_indices() { 4 } else { 2 }
    }

    fn guid(&self) -> usize {
        if self.wide_guid_indices() { 4 } else { 2 }
    }

    fn blob(&self) -> usize {
        if self.wide_blob_indices() { 4 } else { 2 }
    }

    /// Get the row count for a table.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.row_counts[table as usize]
    }

    /// Check if a table index uses 4 bytes (row count > 65535).
    #[must_use]
    pub fn wide_table_index(&self, table: TableId) -> bool {
        self.row_counts[table as usize] > 0xFFFF
    }

    fn index(&self, table: TableId) -> usize {
        if self.wide_table_index(table) { 4 } else { 2 }
    }

    /// Check if a coded index uses 4 bytes.
    #[must_use]
    pub fn wide_coded_index(&self, kind: CodedIndexKind) -> bool {
        let max_rows = kind.max_small_rows();
        kind.tables()
            .iter()
            .flatten()
            .any(|&t| self.row_counts[t as usize] >= max_rows)
    }

    fn coded(&self, kind: CodedIndexKind) -> usize {
        if self.wide_coded_index(kind) { 4 } else { 2 }
    }

    /// Size in bytes of one row of `table` (ECMA-335 II.22).
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        use CodedIndexKind as C;
        use TableId as T;
        match table {
            T::Module => 2 + self.string() + self.guid() * 3,
            T::TypeRef => self.coded(C::ResolutionScope) + self.string() * 2,
            T::TypeDef => {
                4 + self.string() * 2
                    + self.coded(C::TypeDefOrRef)
                    + self.index(T::Field)
                    + self.index(T::MethodDef)
            }
            T::FieldPtr => self.index(T::Field),
            T::Field => 2 + self.string() + self.blob(),
            T::MethodPtr => self.index(T::MethodDef),
            T::MethodDef => 4 + 2 + 2 + self.string() + self.blob() + self.index(T::Param),
            T::ParamPtr => self.index(T::Param),
            T::Param => 2 + 2 + self.string(),
            T::InterfaceImpl => self.index(T::TypeDef) + self.coded(C::TypeDefOrRef),
            T::MemberRef => self.coded(C::MemberRefParent) + self.string() + self.blob(),
            T::Constant => 2 + self.coded(C::HasConstant) + self.blob(),
            T::CustomAttribute => {
                self.coded(C::HasCustomAttribute) + self.coded(C::CustomAttributeType) + self.blob()
            }
            T::FieldMarshal => self.coded(C::HasFieldMarshal) + self.blob(),
            T::DeclSecurity => 2 + self.coded(C::HasDeclSecurity) + self.blob(),
            T::ClassLayout => 2 + 4 + self.index(T::TypeDef),
            T::FieldLayout => 4 + self.index(T::Field),
            T::StandAloneSig => self.blob(),
            T::EventMap => self.index(T::TypeDef) + self.index(T::Event),
            T::EventPtr => self.index(T::Event),
            T::Event => 2 + self.string() + self.coded(C::TypeDefOrRef),
            T::PropertyMap => self.index(T::TypeDef) + self.index(T::Property),
            T::PropertyPtr => self.index(T::Property),
            T::Property => 2 + self.string() + self.blob(),
            T::MethodSemantics => 2 + self.index(T::MethodDef) + self.coded(C::HasSemantics),
            T::MethodImpl => self.index(T::TypeDef) + self.coded(C::MethodDefOrRef) * 2,
            T::ModuleRef => self.string(),
            T::TypeSpec => self.blob(),
            T::ImplMap => {
                2 + self.coded(C::MemberForwarded) + self.string() + self.index(T::ModuleRef)
            }
            T::FieldRva => 4 + self.index(T::Field),
            T::EncLog => 4 + 4,
            T::EncMap => 4,
            T::Assembly => 4 + 2 * 4 + 4 + self.blob() + self.string() * 2,
            T::AssemblyProcessor => 4,
            T::AssemblyOs => 4 * 3,
            T::AssemblyRef => 2 * 4 + 4 + self.blob() * 2 + self.string() * 2,
            T::AssemblyRefProcessor => 4 + self.index(T::AssemblyRef),
            T::AssemblyRefOs => 4 * 3 + self.index(T::AssemblyRef),
            T::File => 4 + self.string() + self.blob(),
            T::ExportedType => 4 + 4 + self.string() * 2 + self.coded(C::Implementation),
            T::ManifestResource => 4 + 4 + self.string() + self.coded(C::Implementation),
            T::NestedClass => self.index(T::TypeDef) * 2,
            T::GenericParam => 2 + 2 + self.coded(C::TypeOrMethodDef) + self.string(),
            T::MethodSpec => self.coded(C::MethodDefOrRef) + self.blob(),
            T::GenericParamConstraint => self.index(T::GenericParam) + self.coded(C::TypeDefOrRef),
        }
    }

    /// Byte offset of every table's first row, relative to the end of the tables header.
    #[must_use]
    pub fn table_offsets(&self) -> [usize; 64] {
        let mut offsets = [0usize; 64];
        let mut cursor = 0usize;
        for table in TableId::ALL {
            offsets[table as usize] = cursor;
            cursor += self.row_count(table) as usize * self.row_size(table);
        }
        offsets
    }
}
