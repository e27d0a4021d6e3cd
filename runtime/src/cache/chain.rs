//! Chain ids: cumulative identity of an ordered layer sequence.
//!
//! `chain([id]) = id` and `chain([.., p, id]) = sha256(chain(..p) + " " + id)`,
//! so any change to an earlier layer changes every later chain id.

use strata_core::Digest;

/// Extend the chain `parent` with `id`.
pub fn chain_id(parent: Option<&Digest>, id: &Digest) -> Digest {
    match parent {
        None => id.clone(),
        Some(parent) => Digest::from_bytes(format!("{} {}", parent, id).as_bytes()),
    }
}

/// Chain id of a whole sequence, bottom-most first. `None` for no layers.
pub fn chain_of<'a>(ids: impl IntoIterator<Item = &'a Digest>) -> Option<Digest> {
    ids.into_iter()
        .fold(None, |parent, id| Some(chain_id(parent.as_ref(), id)))
}
