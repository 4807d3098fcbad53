// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Book directory handling: the two fields of a directory page that offer
//! traversal needs, plus page-key and book-end derivation.

use crate::{
    stobject::{self, StParseError},
    LedgerKey,
};
use byteorder::{BigEndian, ByteOrder};
use sha2::{Digest, Sha512};

/// Namespace tag for directory node keys, `'d'` as a 16 bit prefix.
const DIR_NODE_SPACE: u16 = 0x0064;

/// Offer key array of a directory page: Vector256, field 1.
const FIELD_INDEXES: u8 = 1;
/// Next-page pointer of a directory page: UInt64, field 1.
const FIELD_INDEX_NEXT: u8 = 1;
/// Key of the directory's root page: Hash256, field 8. Every page of a
/// directory carries it, the root included (pointing at itself).
const FIELD_ROOT_INDEX: u8 = 8;

/// The fields of a directory page that book traversal needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryPage {
    /// Keys of the offers held by this page, in directory order.
    pub indexes: Vec<LedgerKey>,
    /// Page number of the next page of this directory, 0 if none.
    pub index_next: u64,
    /// Root page of the directory this page belongs to, when the page
    /// carries the field. Lets a walk resumed at a sub-page re-derive the
    /// chain it is part of.
    pub root_index: Option<LedgerKey>,
}

impl DirectoryPage {
    pub fn parse(blob: &[u8]) -> Result<Self, StParseError> {
        let mut page = DirectoryPage::default();
        stobject::walk_fields(blob, &mut |field| match field.type_code {
            stobject::TYPE_UINT64 if field.field_code == FIELD_INDEX_NEXT => {
                page.index_next = BigEndian::read_u64(field.payload);
            },
            stobject::TYPE_HASH256 if field.field_code == FIELD_ROOT_INDEX => {
                page.root_index = LedgerKey::from_slice(field.payload);
            },
            stobject::TYPE_VECTOR256 if field.field_code == FIELD_INDEXES => {
                for chunk in field.payload.chunks_exact(32) {
                    if let Some(key) = LedgerKey::from_slice(chunk) {
                        page.indexes.push(key);
                    }
                }
            },
            _ => {},
        })?;
        Ok(page)
    }
}

/// The first key past the end of a book: the book base plus one in the
/// 192 bit prefix, i.e. `base + 2^64`. Quality bits of the base are kept.
pub fn quality_next(book_base: &LedgerKey) -> LedgerKey {
    let mut bytes = *book_base.as_bytes();
    for byte in bytes[..24].iter_mut().rev() {
        let (incremented, overflow) = byte.overflowing_add(1);
        *byte = incremented;
        if !overflow {
            break;
        }
    }
    LedgerKey::new(bytes)
}

/// Key of page `index` of the directory rooted at `root`: the root itself
/// for page 0, otherwise the directory-namespace hash of (root, index).
pub fn directory_page_key(root: &LedgerKey, index: u64) -> LedgerKey {
    if index == 0 {
        return *root;
    }
    let mut hasher = Sha512::new();
    hasher.update(DIR_NODE_SPACE.to_be_bytes());
    hasher.update(root.as_bytes());
    hasher.update(index.to_be_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    LedgerKey::new(out)
}

/// Serialize a directory page carrying the given root, offer keys and
/// next-page pointer, in the field layout [`DirectoryPage::parse`] reads.
/// Real pages come from upstream peers; this exists for tests and tools.
pub fn encode_directory(
    root: Option<&LedgerKey>,
    indexes: &[LedgerKey],
    index_next: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + indexes.len() * 32 + 48);
    // LedgerEntryType = DirectoryNode
    stobject::encode_u16(&mut out, 1, 0x0064);
    stobject::encode_u32(&mut out, 2, 0); // Flags
    if let Some(root) = root {
        stobject::encode_hash256(&mut out, FIELD_ROOT_INDEX, root.as_bytes());
    }
    if index_next != 0 {
        stobject::encode_u64(&mut out, FIELD_INDEX_NEXT, index_next);
    }
    let keys: Vec<[u8; 32]> = indexes.iter().map(|key| *key.as_bytes()).collect();
    stobject::encode_vector256(&mut out, FIELD_INDEXES, &keys);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::assert_ok;

    #[test]
    fn directory_round_trip() {
        let root = LedgerKey::from(0xd00du64);
        let keys: Vec<LedgerKey> = (1u64..=5).map(LedgerKey::from).collect();
        let blob = encode_directory(Some(&root), &keys, 3);
        let page = assert_ok!(DirectoryPage::parse(&blob));
        assert_eq!(page.indexes, keys);
        assert_eq!(page.index_next, 3);
        assert_eq!(page.root_index, Some(root));
    }

    #[test]
    fn directory_without_next_page_or_root() {
        let blob = encode_directory(None, &[LedgerKey::from(9u64)], 0);
        let page = assert_ok!(DirectoryPage::parse(&blob));
        assert_eq!(page.index_next, 0);
        assert_eq!(page.indexes.len(), 1);
        assert_eq!(page.root_index, None);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = encode_directory(None, &[LedgerKey::from(9u64)], 7);
        let err = DirectoryPage::parse(&blob[..blob.len() - 1]).unwrap_err();
        assert!(matches!(err, StParseError::Truncated(_)));
    }

    #[test]
    fn quality_next_increments_prefix() {
        let mut base = [0u8; 32];
        base[23] = 5;
        base[31] = 9; // quality bits survive
        let next = quality_next(&LedgerKey::new(base));
        assert_eq!(next.as_bytes()[23], 6);
        assert_eq!(next.as_bytes()[31], 9);

        let mut carry = [0u8; 32];
        for byte in carry[..24].iter_mut() {
            *byte = 0xff;
        }
        let wrapped = quality_next(&LedgerKey::new(carry));
        assert_eq!(&wrapped.as_bytes()[..24], &[0u8; 24]);
    }

    #[test]
    fn page_zero_is_the_root() {
        let root = LedgerKey::from(77u64);
        assert_eq!(directory_page_key(&root, 0), root);
        assert_ne!(directory_page_key(&root, 1), root);
        assert_ne!(
            directory_page_key(&root, 1),
            directory_page_key(&root, 2)
        );
    }
}
