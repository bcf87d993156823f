//! `negotiagent listings …` and `negotiagent sessions …`: manage stored records.

use anyhow::bail;
use negotiagent_protocol::Listing;

use crate::listings::{delete_listing, delete_session, get_listings, get_sessions, save_listing};
use crate::store::KvStore;

pub fn list(store: &dyn KvStore) -> anyhow::Result<()> {
    let listings = get_listings(store)?;
    if listings.is_empty() {
        println!("No listings.");
        return Ok(());
    }
    for listing in listings {
        println!(
            "{}  {}  target={}",
            listing.id.as_deref().unwrap_or("-"),
            listing.title.as_deref().unwrap_or("Untitled"),
            listing.target_price.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub fn add(store: &dyn KvStore, listing: Listing) -> anyhow::Result<()> {
    let listing = Listing {
        title: listing.title.or_else(|| Some("Untitled".into())),
        ..listing
    };
    let saved = save_listing(store, listing)?;
    println!("{}", serde_json::to_string_pretty(&saved)?);
    Ok(())
}

pub fn remove(store: &dyn KvStore, id: &str) -> anyhow::Result<()> {
    if !delete_listing(store, id)? {
        bail!("no listing with id {}", id);
    }
    println!("Removed {}", id);
    Ok(())
}

pub fn list_sessions(store: &dyn KvStore) -> anyhow::Result<()> {
    let sessions = get_sessions(store)?;
    println!("{}", serde_json::to_string_pretty(&sessions)?);
    Ok(())
}

pub fn remove_session(store: &dyn KvStore, id: &str) -> anyhow::Result<()> {
    if !delete_session(store, id)? {
        bail!("no session with id {}", id);
    }
    println!("Removed {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn add_defaults_title_and_remove_unknown_fails() {
        let store = MemoryStore::new();
        add(&store, Listing::default()).unwrap();
        let listings = get_listings(&store).unwrap();
        assert_eq!(listings[0].title.as_deref(), Some("Untitled"));

        assert!(remove(&store, "lst_nope").is_err());
        let id = listings[0].id.clone().unwrap();
        remove(&store, &id).unwrap();
        assert!(get_listings(&store).unwrap().is_empty());
    }
}
