//! Clear command implementation

use anyhow::Result;

use crate::store::ResultStore;

pub fn run(store: &ResultStore, db_id: Option<i64>) -> Result<()> {
    match db_id {
        Some(db_id) => {
            let removed = store.clear_connection(db_id)?;
            println!("Removed {} procedure calls for connection {}", removed, db_id);
        }
        None => {
            store.clear_all()?;
            println!("Removed all stored results, chats and recommendations");
        }
    }
    Ok(())
}
