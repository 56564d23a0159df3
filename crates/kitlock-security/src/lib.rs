mod checksum;
mod tree;

pub use tree::{
    files_digest_hex, integrity_token, parse_integrity_token, tree_digest_hex,
    tree_integrity_token,
};
