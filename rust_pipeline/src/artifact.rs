//! Factor-model artifact: a zip (`.npz`) of named `.npy` arrays.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::npy::{parse_npy, NdArray};

/// Raw members of an `.npz` archive, decoded on demand.
///
/// Keys are the member names without the `.npy` suffix, in archive order.
#[derive(Debug, Clone, Default)]
pub struct FactorArtifact {
    entries: Vec<(String, Vec<u8>)>,
}

/// Cap on capacity reserved from a member's declared (untrusted) size.
const MAX_PREALLOC: u64 = 64 << 20;

fn prealloc_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

impl FactorArtifact {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut member = archive.by_index(i)?;
            if member.is_dir() {
                continue;
            }
            let name = member.name().to_string();
            let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
            let mut bytes = Vec::with_capacity(prealloc_hint(member.size()));
            member.read_to_end(&mut bytes)?;
            debug!(key = %key, bytes = bytes.len(), "read artifact member");
            entries.push((key, bytes));
        }

        Ok(FactorArtifact { entries })
    }

    /// Build from already-encoded `.npy` payloads.
    pub fn from_entries(entries: Vec<(String, Vec<u8>)>) -> Self {
        FactorArtifact { entries }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Decode one array. `None` when the key is absent.
    pub fn array(&self, key: &str) -> Option<Result<NdArray>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(k, bytes)| parse_npy(k, bytes))
    }

    /// First alias present in the archive, with its decoded array.
    pub fn pick_first(&self, aliases: &[&'static str]) -> Option<(&'static str, Result<NdArray>)> {
        aliases
            .iter()
            .find(|alias| self.contains(alias))
            .and_then(|alias| self.array(alias).map(|arr| (*alias, arr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::tests::npy_bytes;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    #[test]
    fn reads_members_and_strips_suffix() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut buf);
            let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            zw.start_file("V.npy", opts).unwrap();
            zw.write_all(&npy_bytes("<i8", false, &[1], &5i64.to_le_bytes())).unwrap();
            zw.start_file("meta.npy", opts).unwrap();
            zw.write_all(b"junk").unwrap();
            zw.finish().unwrap();
        }
        buf.set_position(0);

        let art = FactorArtifact::from_reader(buf).unwrap();
        assert_eq!(art.keys(), vec!["V", "meta"]);
        assert_eq!(art.array("V").unwrap().unwrap().to_text(), vec!["5"]);
        // a broken member only fails when it is actually requested
        assert!(art.array("meta").unwrap().is_err());
        assert!(art.array("U").is_none());
    }

    #[test]
    fn pick_first_respects_alias_order() {
        let one = npy_bytes("<i8", false, &[1], &1i64.to_le_bytes());
        let two = npy_bytes("<i8", false, &[1], &2i64.to_le_bytes());
        let art = FactorArtifact::from_entries(vec![("user_emb".into(), two), ("U".into(), one)]);
        let (key, arr) = art.pick_first(&["user_factors", "U", "user_emb"]).unwrap();
        assert_eq!(key, "U");
        assert_eq!(arr.unwrap().to_text(), vec!["1"]);
        assert!(art.pick_first(&["items"]).is_none());
    }

    #[test]
    fn declared_member_size_only_bounds_preallocation() {
        assert_eq!(prealloc_hint(128), 128);
        assert_eq!(prealloc_hint(u64::MAX), MAX_PREALLOC as usize);
    }
}
