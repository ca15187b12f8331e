//! `nc-migrate types`

use anyhow::Result;
use colored::*;

use crate::transfer::Catalog;

pub fn handle_types_command() -> Result<()> {
    let catalog = Catalog::standard();

    println!(
        "{:<5} {:<18} {:<26} {}",
        "Rank".bold(),
        "Key".bold(),
        "Name".bold(),
        "References".bold()
    );
    for entity_type in catalog.types() {
        let descriptor = catalog.descriptor(entity_type);
        let refs: Vec<String> = descriptor
            .foreign_keys
            .iter()
            .map(|fk| format!("{} -> {}", fk.field, fk.references))
            .collect();

        let label = if descriptor.migratable {
            entity_type.label().normal()
        } else {
            format!("{} (export only)", entity_type.label()).dimmed()
        };
        println!(
            "{:<5} {:<18} {:<26} {}",
            descriptor.rank,
            entity_type.key(),
            label,
            refs.join(", ")
        );
    }
    Ok(())
}
