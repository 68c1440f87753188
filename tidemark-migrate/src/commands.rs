//! Command handlers
//!
//! Handlers only see a source and a store, so they run the same against
//! PostgreSQL and against the in-memory store used in tests.

use anyhow::{bail, Context};
use chrono::Local;
use colored::Colorize;
use tidemark::migration::{
    AppliedVersionRecord, MigrationSource, MigrationStatus, Migrator, PendingMigration,
    Resolution, VersionStore,
};

pub fn handle_up(
    migrator: &Migrator,
    source: &dyn MigrationSource,
    store: &dyn VersionStore,
    steps: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<usize> {
    if dry_run {
        let pending = migrator.plan(source, store).context("Failed to plan migrations")?;
        let to_apply = steps.unwrap_or(pending.len()).min(pending.len());
        if to_apply == 0 {
            println!("No pending migrations to apply");
            return Ok(0);
        }

        println!("Would apply {} migration(s):", to_apply);
        for (i, unit) in pending.iter().take(to_apply).enumerate() {
            println!(
                "  {}. {} ({} statement(s))",
                i + 1,
                unit.label(),
                unit.statements().len()
            );
        }
        return Ok(0);
    }

    println!("Applying migrations...");
    let applied = match steps {
        Some(steps) => migrator.up_steps(source, store, steps),
        None => migrator.up(source, store),
    }
    .context("Migration run failed")?;

    if applied > 0 {
        println!("✅ Successfully applied {} migration(s)", applied);
    } else {
        println!("✅ No migrations to apply");
    }
    Ok(applied)
}

pub fn handle_status(
    migrator: &Migrator,
    source: &dyn MigrationSource,
    store: &dyn VersionStore,
) -> anyhow::Result<MigrationStatus> {
    let status = migrator.status(source, store).context("Failed to read migration status")?;

    println!("\n📊 Migration Status\n");

    if let Some(version) = status.dirty_version {
        println!(
            "{} version {} did not complete; repair it and run `resolve`\n",
            "DIRTY:".red().bold(),
            version
        );
    }

    if status.applied.is_empty() {
        println!("✅ Applied Migrations: None");
    } else {
        println!("✅ Applied Migrations ({}):", status.applied_count());
        for record in &status.applied {
            println!("  {} {}", "✓".green(), describe_record(record));
        }
    }

    println!();

    if status.pending.is_empty() {
        println!("⏳ Pending Migrations: None");
    } else {
        println!("⏳ Pending Migrations ({}):", status.pending_count());
        for pending in &status.pending {
            let marker = if status.dirty_version == Some(pending.version) {
                "dirty".red()
            } else {
                "pending".yellow()
            };
            println!("  ⏳ {}_{} ({})", pending.version, pending.name, marker);
        }
    }

    if !status.skipped.is_empty() {
        println!("\n⚠️  Skipped Migrations ({}):", status.skipped.len());
        for skipped in &status.skipped {
            println!(
                "  {} {}_{} (older than the current version, never applied)",
                "!".yellow(),
                skipped.version,
                skipped.name
            );
        }
    }

    println!(
        "\n📈 Summary: {} applied, {} pending",
        status.applied_count(),
        status.pending_count()
    );

    Ok(status)
}

pub fn handle_validate(
    migrator: &Migrator,
    source: &dyn MigrationSource,
    store: &dyn VersionStore,
) -> anyhow::Result<usize> {
    println!("Validating checksums...");
    let verified = migrator.validate(source, store).context("Validation failed")?;
    println!("✅ All checksums valid ({} migration(s) checked)", verified);
    Ok(verified)
}

pub fn handle_info(
    migrator: &Migrator,
    source: &dyn MigrationSource,
    store: &dyn VersionStore,
    version: Option<i64>,
) -> anyhow::Result<()> {
    let status = migrator.status(source, store).context("Failed to read migration status")?;

    let Some(version) = version else {
        println!("\n📋 Migration System Information\n");
        println!("Total Migrations: {}", status.applied_count() + status.pending_count());
        println!("Applied: {}", status.applied_count());
        println!("Pending: {}", status.pending_count());
        if let Some(current) = status.current_version {
            println!("Current Version: {}", current);
        }
        if let Some(next) = status.next_pending_version() {
            println!("Next Pending Version: {}", next);
        }
        if let Some(dirty) = status.dirty_version {
            println!("Dirty Version: {}", dirty.to_string().red());
        }
        return Ok(());
    };

    if let Some(record) = status.applied.iter().find(|r| r.version == version) {
        println!("\n📋 Migration Information\n");
        println!("Version: {}", record.version);
        println!("Name: {}", record.name.as_deref().unwrap_or("(not recorded)"));
        println!("Checksum: {}", record.checksum.as_deref().unwrap_or("(not recorded)"));
        if let Some(applied_at) = record.applied_at {
            println!(
                "Applied At: {}",
                applied_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z")
            );
        }
        if let Some(ms) = record.execution_time_ms {
            println!("Execution Time: {}ms", ms);
        }
        println!("Status: {}", "Applied".green());
    } else if let Some((pending, state)) = find_unapplied(&status, version) {
        println!("\n📋 Migration Information\n");
        println!("Version: {}", pending.version);
        println!("Name: {}", pending.name);
        println!("Checksum: {}", pending.checksum);
        println!("Status: {}", state);
    } else {
        bail!("Migration version {version} is neither applied nor present in the migration source");
    }

    Ok(())
}

pub fn handle_resolve(
    migrator: &Migrator,
    source: &dyn MigrationSource,
    store: &dyn VersionStore,
    resolution: Resolution,
) -> anyhow::Result<Option<i64>> {
    let resolved = migrator
        .resolve_dirty(source, store, resolution)
        .context("Failed to resolve dirty state")?;

    match resolved {
        Some(version) => {
            let outcome = match resolution {
                Resolution::Applied => "applied",
                Resolution::RolledBack => "rolled back; it will run again on the next `up`",
            };
            println!("✅ Version {} marked as {}", version, outcome);
        }
        None => println!("✅ Nothing to resolve: no version is dirty"),
    }
    Ok(resolved)
}

fn find_unapplied(
    status: &MigrationStatus,
    version: i64,
) -> Option<(&PendingMigration, colored::ColoredString)> {
    if let Some(pending) = status.pending.iter().find(|p| p.version == version) {
        let state = if status.dirty_version == Some(version) {
            "Dirty".red()
        } else {
            "Pending".yellow()
        };
        return Some((pending, state));
    }

    status
        .skipped
        .iter()
        .find(|p| p.version == version)
        .map(|p| (p, "Skipped".yellow()))
}

fn describe_record(record: &AppliedVersionRecord) -> String {
    let applied_at = record.applied_at.map_or_else(
        || "N/A".to_string(),
        |at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    let time = record
        .execution_time_ms
        .map_or_else(|| "N/A".to_string(), |ms| format!("{}ms", ms));
    format!("{} ({}, {})", record.label(), applied_at, time)
}
