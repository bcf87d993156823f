//! Listing and negotiation-session records kept as arrays in the store.

use negotiagent_protocol::{new_id, Listing, NegotiationSession};

use crate::store::{KvStore, KvStoreExt, StoreError};

pub const KEY_LISTINGS: &str = "neg_listings";
pub const KEY_SESSIONS: &str = "neg_sessions";

pub fn get_listings(store: &dyn KvStore) -> Result<Vec<Listing>, StoreError> {
    store.get_or(KEY_LISTINGS, Vec::new())
}

/// Insert or replace by id, assigning `lst_<uuid>` when the record has none.
pub fn save_listing(store: &dyn KvStore, mut listing: Listing) -> Result<Listing, StoreError> {
    let id = listing
        .id
        .get_or_insert_with(|| format!("lst_{}", new_id()))
        .clone();
    let mut listings = get_listings(store)?;
    match listings.iter_mut().find(|l| l.id.as_deref() == Some(id.as_str())) {
        Some(existing) => *existing = listing.clone(),
        None => listings.push(listing.clone()),
    }
    store.set(KEY_LISTINGS, &listings)?;
    Ok(listing)
}

/// Returns true when a record was removed.
pub fn delete_listing(store: &dyn KvStore, id: &str) -> Result<bool, StoreError> {
    let mut listings = get_listings(store)?;
    let before = listings.len();
    listings.retain(|l| l.id.as_deref() != Some(id));
    let removed = listings.len() != before;
    if removed {
        store.set(KEY_LISTINGS, &listings)?;
    }
    Ok(removed)
}

pub fn get_sessions(store: &dyn KvStore) -> Result<Vec<NegotiationSession>, StoreError> {
    store.get_or(KEY_SESSIONS, Vec::new())
}

pub fn save_session(
    store: &dyn KvStore,
    mut session: NegotiationSession,
) -> Result<NegotiationSession, StoreError> {
    let id = session
        .id
        .get_or_insert_with(|| format!("sess_{}", new_id()))
        .clone();
    let mut sessions = get_sessions(store)?;
    match sessions.iter_mut().find(|s| s.id.as_deref() == Some(id.as_str())) {
        Some(existing) => *existing = session.clone(),
        None => sessions.push(session.clone()),
    }
    store.set(KEY_SESSIONS, &sessions)?;
    Ok(session)
}

pub fn delete_session(store: &dyn KvStore, id: &str) -> Result<bool, StoreError> {
    let mut sessions = get_sessions(store)?;
    let before = sessions.len();
    sessions.retain(|s| s.id.as_deref() != Some(id));
    let removed = sessions.len() != before;
    if removed {
        store.set(KEY_SESSIONS, &sessions)?;
    }
    Ok(removed)
}
