//! Connection registry commands

use anyhow::{Context, Result};

use crate::store::{NewConnection, ResultStore};

pub fn add(store: &ResultStore, new: NewConnection) -> Result<()> {
    if let Some(existing) = store.find_connection(&new.db_host, new.db_port, &new.db_user)? {
        println!(
            "Connection already registered with ID {} ({}@{}:{})",
            existing.db_id, existing.db_user, existing.db_host, existing.db_port
        );
        return Ok(());
    }

    let db_id = store
        .insert_connection(&new)
        .context("Failed to register connection")?;
    println!(
        "Connection '{}' registered with ID: {}",
        new.db_name.trim(),
        db_id
    );
    Ok(())
}

pub fn list(store: &ResultStore) -> Result<()> {
    let connections = store.list_connections()?;
    if connections.is_empty() {
        println!("No connections found. Run 'blitzscope connection add' first.");
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:<25} {:<6} {:<12} {:<10} {}",
        "ID", "Database", "Host", "Port", "User", "Memory MB", "Version"
    );
    println!("{}", "-".repeat(100));
    for c in connections {
        let memory = c
            .instance_memory_mb
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        let version = c
            .version
            .as_deref()
            .map(|v| super::truncate(v, 30))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<20} {:<25} {:<6} {:<12} {:<10} {}",
            c.db_id, c.db_name, c.db_host, c.db_port, c.db_user, memory, version
        );
    }
    Ok(())
}

pub fn remove(store: &ResultStore, db_id: i64) -> Result<()> {
    if store.delete_connection(db_id)? {
        println!("Removed connection {} and its stored results", db_id);
    } else {
        println!("No connection with ID {}", db_id);
    }
    Ok(())
}

/// Record server details reported by `SELECT @@VERSION` and the instance's
/// memory settings
pub fn refresh(
    store: &ResultStore,
    db_id: i64,
    version: Option<String>,
    instance_memory_mb: Option<i64>,
) -> Result<()> {
    let current = store.get_connection(db_id)?;
    let version = version.or(current.version);
    let memory = instance_memory_mb.or(current.instance_memory_mb);

    store.update_server_metadata(db_id, version.as_deref(), memory)?;
    println!("Updated server details for connection {}", db_id);
    Ok(())
}
