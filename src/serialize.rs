//! Writing a patched module back to a PE image.
//!
//! Rows are never renumbered and untouched bytes are copied verbatim. A
//! replaced body is written over the original when it fits; otherwise it goes to
//! an appended `.patch` section and its MethodDef RVA is redirected. New string
//! literals grow `#US`, in which case the whole metadata block is relocated into
//! the same section.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::heaps::MAX_USER_STRING_OFFSET;
use crate::il::is_fat_header;
use crate::module::Module;
use crate::pe::{PeImage, patch_u32};
use crate::root::MetadataRoot;
use crate::tables::TableId;
use crate::token::{Token, USER_STRING_TOKEN_TYPE};

/// A body that has to live in the appended section.
struct Relocated {
    row: u32,
    bytes: Vec<u8>,
}

impl Module {
    /// Serialize the module, including every replaced body.
    ///
    /// An unmodified module is returned byte for byte.
    pub fn write(&self) -> Result<Vec<u8>> {
        if !self.is_modified() {
            return Ok(self.image.clone());
        }

        let mut out = self.image.clone();
        let mut pe = self.pe.clone();
        let mut user_strings = self.metadata.user_strings.clone();
        let mut intern = |s: &str| -> Result<Token> {
            let offset = match user_strings.find(s) {
                Some(offset) => offset,
                None => user_strings.add(s),
            };
            if offset as usize > MAX_USER_STRING_OFFSET {
                return Err(Error::UserStringHeapFull(offset as usize));
            }
            Ok(Token((u32::from(USER_STRING_TOKEN_TYPE) << 24) | offset))
        };

        let mut rva_users: HashMap<u32, usize> = HashMap::new();
        for row in &self.metadata.method_defs {
            *rva_users.entry(row.rva).or_default() += 1;
        }

        let mut relocated = Vec::new();
        let mut in_place = 0usize;
        for method in self.methods().filter(|m| m.is_modified()) {
            let Some(body) = method.body() else {
                continue;
            };
            let bytes = body.encode(&mut intern)?;
            let shared = rva_users.get(&method.rva).copied().unwrap_or(0) > 1;
            let aligned = !is_fat_header(&bytes) || method.rva % 4 == 0;

            if method.rva != 0 && !shared && aligned && bytes.len() <= method.extent {
                let offset = pe.rva_to_offset(method.rva)?;
                out[offset..offset + bytes.len()].copy_from_slice(&bytes);
                out[offset + bytes.len()..offset + method.extent].fill(0);
                in_place += 1;
                log::debug!("{method}: {} byte body written in place at RVA 0x{:08X}", bytes.len(), method.rva);
            } else {
                log::debug!(
                    "{method}: {} byte body relocated (original {} bytes{})",
                    bytes.len(),
                    method.extent,
                    if shared { ", shared RVA" } else { "" }
                );
                relocated.push(Relocated {
                    row: method.token.row(),
                    bytes,
                });
            }
        }

        let grew_user_strings = user_strings.size() != self.metadata.user_strings.size();
        if relocated.is_empty() && !grew_user_strings {
            log::info!("{in_place} bodies rewritten in place");
            self.finish(&mut pe, &mut out);
            return Ok(out);
        }

        pe.check_section_header_space()?;
        let section_rva = pe.next_section_rva();
        let mut section = Vec::new();
        let mut body_rvas = Vec::with_capacity(relocated.len());
        for body in &relocated {
            section.resize(section.len().next_multiple_of(4), 0);
            body_rvas.push((body.row, section_rva + section.len() as u32));
            section.extend_from_slice(&body.bytes);
        }

        if grew_user_strings {
            let original = pe.slice(
                &self.image,
                self.cli_header.metadata.rva,
                self.cli_header.metadata.size as usize,
            )?;
            let mut block = self
                .metadata
                .relayout_with_user_strings(original, &user_strings)?;
            let shift = tables_shift(&self.metadata.root, &block)?;
            for &(row, rva) in &body_rvas {
                let offset = self.metadata.row_offset(TableId::MethodDef, row)?;
                patch_u32(&mut block, offset.wrapping_add_signed(shift), rva);
            }

            section.resize(section.len().next_multiple_of(4), 0);
            let metadata_rva = section_rva + section.len() as u32;
            let metadata_size = block.len() as u32;
            section.extend_from_slice(&block);

            let directory = self.cli_header.metadata_directory_offset();
            patch_u32(&mut out, directory, metadata_rva);
            patch_u32(&mut out, directory + 4, metadata_size);
            log::debug!(
                "metadata relocated to RVA 0x{metadata_rva:08X} ({metadata_size} bytes, #US {} bytes)",
                user_strings.size()
            );
        } else {
            for &(row, rva) in &body_rvas {
                let offset = self.metadata.row_offset(TableId::MethodDef, row)?;
                patch_u32(&mut out, self.metadata_offset + offset, rva);
            }
        }

        pe.append_section(&mut out, &section)?;
        log::info!(
            "{in_place} bodies rewritten in place, {} relocated",
            relocated.len()
        );
        self.finish(&mut pe, &mut out);
        Ok(out)
    }

    /// Serialize and atomically replace `path`.
    ///
    /// The image is written to a temporary file in the destination directory and
    /// renamed over `path`, so a failure leaves the destination untouched.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.write()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(path)?;
        log::debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn finish(&self, pe: &mut PeImage, out: &mut [u8]) {
        pe.refresh_checksum(out);
        if self.cli_header.is_strong_name_signed() {
            log::warn!("strong-name signature is now invalid; re-sign or disable verification");
        }
        if pe.has_authenticode() {
            log::warn!("Authenticode signature is now invalid");
        }
    }
}

/// How far the tables stream moved between the original root and `block`.
fn tables_shift(original: &MetadataRoot, block: &[u8]) -> Result<isize> {
    let relocated = MetadataRoot::parse(block)?;
    let offset = |root: &MetadataRoot| {
        root.tables_stream()
            .map(|s| s.offset as isize)
            .ok_or_else(|| Error::StreamNotFound("#~".to_string()))
    };
    Ok(offset(&relocated)? - offset(original)?)
}
