//! The module model: a parsed managed image and its Type → Method → Parameter graph.

use std::fmt;
use std::path::Path;

use crate::cli_header::CliHeader;
use crate::error::{Error, Result};
use crate::il::MethodBody;
use crate::metadata::Metadata;
use crate::pe::PeImage;
use crate::signature::{MethodSig, ReturnKind};
use crate::tables::TableId;
use crate::token::Token;

/// `MethodAttributes.Static`.
pub const METHOD_ATTRIBUTE_STATIC: u16 = 0x0010;
/// `MethodImplAttributes.CodeTypeMask`.
const METHOD_IMPL_CODE_TYPE_MASK: u16 = 0x0003;
/// `MethodImplAttributes.Unmanaged`.
const METHOD_IMPL_UNMANAGED: u16 = 0x0004;

/// A named parameter from the Param table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name; empty when the signature parameter has no Param row.
    pub name: String,
    /// 1-based position in the signature.
    pub position: u16,
}

/// A method definition with its decoded body.
#[derive(Debug, Clone)]
pub struct Method {
    /// MethodDef token (table 0x06).
    pub token: Token,
    /// Simple method name from `#Strings`.
    pub name: String,
    /// Full name of the declaring type.
    pub declaring_type: String,
    /// `MethodAttributes`.
    pub flags: u16,
    /// `MethodImplAttributes`.
    pub impl_flags: u16,
    /// RVA of the body in the input image, 0 for methods without IL.
    pub rva: u32,
    /// Return type class decoded from the signature.
    pub return_kind: ReturnKind,
    /// One entry per signature parameter, in position order.
    pub parameters: Vec<Parameter>,
    body: Option<MethodBody>,
    /// Encoded size of the original body.
    pub(crate) extent: usize,
    modified: bool,
}

impl Method {
    /// Whether `MethodAttributes.Static` is set.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags & METHOD_ATTRIBUTE_STATIC != 0
    }

    /// Number of parameters in the signature (excluding `this`).
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.parameters.len()
    }

    /// The current body, absent for abstract, extern and runtime methods.
    #[must_use]
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }

    /// Whether the body has been replaced since parsing.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// `Namespace.Type::Name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.declaring_type, self.name)
    }

    pub(crate) fn install_body(&mut self, body: MethodBody) {
        self.body = Some(body);
        self.modified = true;
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.full_name())?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&param.name)?;
        }
        f.write_str(")")
    }
}

/// A type definition and the methods it declares.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// TypeDef token (table 0x02).
    pub token: Token,
    /// Namespace, empty for nested types and the global type.
    pub namespace: String,
    /// Simple type name.
    pub name: String,
    /// `Namespace.Name`, or `Enclosing/Nested` for nested types.
    pub full_name: String,
    /// `TypeAttributes`.
    pub flags: u32,
    /// Methods in MethodDef ownership order.
    pub methods: Vec<Method>,
}

/// A parsed managed module.
#[derive(Debug, Clone)]
pub struct Module {
    /// The input image, never mutated.
    pub(crate) image: Vec<u8>,
    pub(crate) pe: PeImage,
    pub(crate) cli_header: CliHeader,
    pub(crate) metadata: Metadata,
    /// File offset of the metadata root.
    pub(crate) metadata_offset: usize,
    types: Vec<TypeDef>,
}

impl Module {
    /// Parse a managed module from its file bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let image = bytes.to_vec();
        let pe = PeImage::parse(&image)?;
        let clr = pe.clr_directory()?;
        let cli_header = CliHeader::parse(&image, pe.rva_to_offset(clr.rva)?)?;

        let metadata_offset = pe.rva_to_offset(cli_header.metadata.rva)?;
        let metadata_bytes = pe.slice(&image, cli_header.metadata.rva, cli_header.metadata.size as usize)?;
        let metadata = Metadata::parse(metadata_bytes)?;

        let types = build_types(&image, &pe, &metadata)?;
        log::debug!(
            "parsed module: {} sections, metadata at 0x{:X} ({} bytes), {} types",
            pe.sections.len(),
            metadata_offset,
            cli_header.metadata.size,
            types.len()
        );

        Ok(Self {
            image,
            pe,
            cli_header,
            metadata,
            metadata_offset,
            types,
        })
    }

    /// Read and parse a module from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    /// The original image bytes.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Runtime version from the metadata root, e.g. `v4.0.30319`.
    #[must_use]
    pub fn runtime_version(&self) -> &str {
        self.metadata.version()
    }

    /// Types in TypeDef order.
    #[must_use]
    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    /// Every method of every type, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.types.iter().flat_map(|t| t.methods.iter())
    }

    /// Mutable access to every method, in declaration order.
    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut Method> {
        self.types.iter_mut().flat_map(|t| t.methods.iter_mut())
    }

    /// Find a method by declaring type full name and method name.
    #[must_use]
    pub fn find_method(&self, type_name: &str, method_name: &str) -> Option<&Method> {
        self.methods()
            .find(|m| m.declaring_type == type_name && m.name == method_name)
    }

    /// Whether any body has been replaced.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.methods().any(Method::is_modified)
    }
}

fn build_types(image: &[u8], pe: &PeImage, metadata: &Metadata) -> Result<Vec<TypeDef>> {
    let full_names = metadata.type_names()?;
    let mut types = Vec::with_capacity(metadata.type_defs.len());

    for (index, (row, full_name)) in metadata.type_defs.iter().zip(full_names).enumerate() {
        let mut methods = Vec::new();
        for method_row in metadata.methods_of(index)? {
            methods.push(build_method(image, pe, metadata, method_row, &full_name)?);
        }
        types.push(TypeDef {
            token: Token::new(TableId::TypeDef, index as u32 + 1),
            namespace: metadata.strings.get(row.type_namespace)?.to_string(),
            name: metadata.strings.get(row.type_name)?.to_string(),
            full_name,
            flags: row.flags,
            methods,
        });
    }
    Ok(types)
}

fn build_method(
    image: &[u8],
    pe: &PeImage,
    metadata: &Metadata,
    row: u32,
    declaring_type: &str,
) -> Result<Method> {
    let def = metadata.method_def(row)?;
    let name = metadata.strings.get(def.name)?.to_string();
    let sig = MethodSig::parse_blob(metadata.blobs.get(def.signature)?)?;

    let mut parameters: Vec<Parameter> = (1..=sig.params.len())
        .map(|position| Parameter {
            name: String::new(),
            position: position as u16,
        })
        .collect();
    for param_row in metadata.params_of(row)? {
        let param = metadata.param(param_row)?;
        // Sequence 0 describes the return value.
        if let Some(slot) = (param.sequence as usize)
            .checked_sub(1)
            .and_then(|i| parameters.get_mut(i))
        {
            slot.name = metadata.strings.get(param.name)?.to_string();
        }
    }

    let has_il = def.rva != 0
        && def.impl_flags & METHOD_IMPL_CODE_TYPE_MASK == 0
        && def.impl_flags & METHOD_IMPL_UNMANAGED == 0;
    let (body, extent) = if has_il {
        let offset = pe.rva_to_offset(def.rva)?;
        let data = image
            .get(offset..)
            .filter(|data| !data.is_empty())
            .ok_or(Error::UnexpectedEof { offset, needed: 1 })?;
        let (body, extent) = MethodBody::parse(data, def.rva, &metadata.user_strings)?;
        (Some(body), extent)
    } else {
        (None, 0)
    };

    Ok(Method {
        token: Token::new(TableId::MethodDef, row),
        name,
        declaring_type: declaring_type.to_string(),
        flags: def.flags,
        impl_flags: def.impl_flags,
        rva: def.rva,
        return_kind: sig.return_type.return_kind(),
        parameters,
        body,
        extent,
        modified: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{ImageBuilder, MethodSpec};

    #[test]
    fn test_parse_types_and_methods() {
        let image = ImageBuilder::new()
            .namespace("Acme.Licensing")
            .class("Foo")
            .method(MethodSpec::instance("IsFeatureActivated", &["featureGuid"]).returns_bool())
            .method(MethodSpec::instance("IsFeatureActivated", &[]).returns_bool())
            .method(MethodSpec::static_("Reset", &["a", "b"]))
            .build();
        let module = Module::parse(&image).unwrap();

        assert_eq!(module.runtime_version(), "v4.0.30319");
        let foo = &module.types()[1];
        assert_eq!(foo.full_name, "Acme.Licensing.Foo");
        assert_eq!(foo.methods.len(), 3);

        let method = &foo.methods[0];
        assert_eq!(method.token, Token(0x0600_0001));
        assert!(!method.is_static());
        assert_eq!(method.return_kind, ReturnKind::Integer);
        assert_eq!(method.to_string(), "Acme.Licensing.Foo::IsFeatureActivated(featureGuid)");
        assert!(method.body().is_some());
        assert!(!method.is_modified());

        let reset = &foo.methods[2];
        assert!(reset.is_static());
        assert_eq!(reset.parameters[1], Parameter { name: "b".to_string(), position: 2 });
        assert_eq!(reset.return_kind, ReturnKind::Void);
    }

    #[test]
    fn test_large_class_owns_every_method_and_param() {
        let count = 5_000;
        let mut builder = ImageBuilder::new().namespace("Acme.Generated").class("Wide");
        for i in 0..count {
            builder = builder.method(MethodSpec::static_(&format!("M{i}"), &[&format!("p{i}")]));
        }
        let image = builder
            .class("Tail")
            .method(MethodSpec::instance("Last", &["x", "y"]))
            .build();
        let module = Module::parse(&image).unwrap();

        let wide = &module.types()[1];
        assert_eq!(wide.methods.len(), count);
        for (i, method) in wide.methods.iter().enumerate() {
            assert_eq!(method.name, format!("M{i}"));
            assert_eq!(method.parameters.len(), 1);
            assert_eq!(method.parameters[0].name, format!("p{i}"));
        }

        let last = module.find_method("Acme.Generated.Tail", "Last").unwrap();
        assert_eq!(last.token, Token(0x0600_0000 | (count as u32 + 1)));
        let names: Vec<_> = last.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn test_nested_type_names() {
        let image = ImageBuilder::new()
            .namespace("Outer.Ns")
            .class("Host")
            .method(MethodSpec::static_("Run", &["x"]))
            .nested_class("Inner")
            .method(MethodSpec::instance("Check", &["key"]))
            .build();
        let module = Module::parse(&image).unwrap();
        let names: Vec<_> = module.types().iter().map(|t| t.full_name.as_str()).collect();
        assert_eq!(names, ["<Module>", "Outer.Ns.Host", "Outer.Ns.Host/Inner"]);
        assert!(module.find_method("Outer.Ns.Host/Inner", "Check").is_some());
    }

    #[test]
    fn test_unnamed_parameters_are_empty() {
        let image = ImageBuilder::new()
            .class("Foo")
            .method(MethodSpec::static_("Anon", &["first"]).extra_unnamed_params(1))
            .build();
        let module = Module::parse(&image).unwrap();
        let method = module.find_method("Foo", "Anon").unwrap();
        assert_eq!(method.param_count(), 2);
        assert_eq!(method.parameters[1].name, "");
    }

    #[test]
    fn test_abstract_method_has_no_body() {
        let image = ImageBuilder::new()
            .class("Foo")
            .method(MethodSpec::instance("Check", &["key"]).without_body())
            .build();
        let module = Module::parse(&image).unwrap();
        let method = module.find_method("Foo", "Check").unwrap();
        assert_eq!(method.rva, 0);
        assert!(method.body().is_none());
    }

    #[test]
    fn test_format_errors() {
        assert!(Module::parse(b"not a module").unwrap_err().is_format_error());

        let image = ImageBuilder::new().without_clr_header().build();
        assert!(matches!(Module::parse(&image), Err(Error::MissingCliHeader)));

        let image = ImageBuilder::new()
            .class("Foo")
            .method(MethodSpec::static_("A", &["x"]))
            .build();
        let offset = ImageBuilder::metadata_file_offset(&image);
        let truncated = &image[..offset + 16];
        assert!(Module::parse(truncated).unwrap_err().is_format_error());

        let mut corrupt = image.clone();
        corrupt[offset] = b'X';
        assert!(matches!(Module::parse(&corrupt), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn test_corrupt_body_is_format_error() {
        let image = ImageBuilder::new()
            .class("Foo")
            .method(MethodSpec::static_("A", &["x"]).raw_body(vec![0x0A, 0xA6, 0x2A]))
            .build();
        assert!(matches!(
            Module::parse(&image),
            Err(Error::InvalidOpcode { opcode: 0xA6, .. })
        ));
    }

    /// Section claims more raw data than the file holds and a method RVA points into the gap.
    fn overstated_section_image() -> Vec<u8> {
        let image = ImageBuilder::new()
            .class("Foo")
            .method(MethodSpec::static_("A", &["x"]))
            .build();
        let module = Module::parse(&image).unwrap();
        let rva_column = module.metadata_offset
            + module.metadata.row_offset(TableId::MethodDef, 1).unwrap();

        let mut image = image;
        // e_lfanew + PE signature + COFF header + PE32 optional header
        let section = 0x80 + 4 + 20 + 0xE0;
        image[section + 8..section + 12].copy_from_slice(&0x20000u32.to_le_bytes());
        image[section + 16..section + 20].copy_from_slice(&0x20000u32.to_le_bytes());
        image[rva_column..rva_column + 4].copy_from_slice(&0x12000u32.to_le_bytes());
        image
    }

    #[test]
    fn test_body_past_end_of_file_is_format_error() {
        let image = overstated_section_image();
        let err = Module::parse(&image).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { offset: 0x10200, .. }));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_unmapped_body_rva_is_format_error() {
        let image = ImageBuilder::new()
            .class("Foo")
            .method(MethodSpec::static_("A", &["x"]))
            .build();
        let module = Module::parse(&image).unwrap();
        let rva_column = module.metadata_offset
            + module.metadata.row_offset(TableId::MethodDef, 1).unwrap();

        let mut image = image;
        image[rva_column..rva_column + 4].copy_from_slice(&0x00F0_0000u32.to_le_bytes());
        assert!(matches!(Module::parse(&image), Err(Error::UnmappedRva(0x00F0_0000))));
    }
}
