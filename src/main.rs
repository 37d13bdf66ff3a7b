//! ebook-device command line entry point.

use clap::Parser;
use ebook_device::{
    BookMetadata, DeviceRegistry, DeviceSession, SlotId,
    config::{Cli, Command, Config, DeviceArgs},
    device::{
        CancelToken, DetectedDevice, MountedPaths, Platform, Progress, UploadOptions,
        UploadRequest,
    },
    formats::{ReaderRegistry, metadata_from_filename},
    fs::{DeviceFilesystem, MemoryTransport, MtpFilesystem},
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Storage id the in-memory device reports for main memory.
const MEMORY_STORAGE_ID: u32 = 0x0001_0001;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ebook_device=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        tracing::debug!(path = %path.display(), "Loading config");
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Drivers => cmd_drivers(&config),
        Command::Identify {
            vendor,
            product,
            bcd,
            manufacturer,
            product_name,
            label,
            platform,
        } => {
            let platform = platform.unwrap_or_default();
            let detected = match (label, vendor, product) {
                (Some(label), _, _) => DetectedDevice::Volume { label, platform },
                (None, Some(vendor_id), Some(product_id)) => DetectedDevice::Usb {
                    vendor_id,
                    product_id,
                    bcd,
                    manufacturer,
                    product: product_name,
                    platform,
                },
                _ => anyhow::bail!("Give --vendor and --product, or --label"),
            };
            cmd_identify(&config, &detected)
        }
        Command::List { device, slot } => cmd_list(&config, &device, slot),
        Command::Upload {
            files,
            device,
            slot,
            overwrite,
        } => cmd_upload(&config, &device, &files, slot, overwrite),
        Command::Delete {
            paths,
            device,
            slot,
        } => cmd_delete(&config, &device, &paths, slot),
    }
}

/// Write a default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());
    println!("\nEdit config.toml to add devices and folders.");
    println!("Then run: ebook-device list --folder /path/to/books");

    Ok(())
}

fn cmd_drivers(config: &Config) -> anyhow::Result<()> {
    let registry = config.registry();

    println!("{:<44} {:<10} {:<8} FORMATS", "NAME", "VENDOR", "USB IDS");
    println!("{}", "-".repeat(90));
    for driver in registry.drivers() {
        println!(
            "{:<44} {:<10} {:<8} {}",
            driver.name(),
            driver.identity.vendor_name,
            driver.identity.usb_ids.len(),
            driver.capabilities.supported_formats.join(",")
        );
    }

    Ok(())
}

fn cmd_identify(config: &Config, detected: &DetectedDevice) -> anyhow::Result<()> {
    let registry = config.registry();

    let Some(driver) = registry.identify(detected) else {
        println!("No driver handles this device.");
        return Ok(());
    };

    let caps = &driver.capabilities;
    println!("Driver:     {}", driver.name());
    println!("Formats:    {}", caps.supported_formats.join(", "));
    println!(
        "Book dirs:  main={:?} card-a={:?} card-b={:?}",
        caps.main_dir, caps.card_a_dir, caps.card_b_dir
    );
    println!("Subdirs:    {}", if caps.supports_subdirectories { "yes" } else { "no" });
    if !caps.auxiliary_delete_extensions.is_empty() {
        println!("Sidecars:   {}", caps.auxiliary_delete_extensions.join(", "));
    }
    if let DetectedDevice::Volume { label, platform } = detected
        && let Some(slot) = driver.identity.slot_for_volume(label, *platform)
    {
        println!("Volume:     {}", slot);
    }

    Ok(())
}

fn cmd_list(config: &Config, args: &DeviceArgs, only: Option<SlotId>) -> anyhow::Result<()> {
    let registry = config.registry();
    let mut session = open_session(config, &registry, args)?;
    session.open()?;

    for slot in session.slots() {
        if !slot.is_present() || only.is_some_and(|s| s != slot.id) {
            continue;
        }
        println!(
            "{} ({} free of {})",
            slot.id,
            format_bytes(slot.free_bytes),
            format_bytes(slot.total_bytes)
        );

        let books: Vec<_> = session.list_books(slot.id)?.collect();
        if books.is_empty() {
            println!("  No books.");
            continue;
        }
        let caps = session.capabilities();
        println!("  {:<50} {:>10} {:<28} TITLE", "PATH", "SIZE", "TYPE");
        for book in books {
            let authors = book.metadata.authors_display();
            let mut kind = book.mime_type().unwrap_or("-").to_string();
            if caps.is_drm_restricted(&book.format_extension) {
                kind.push_str(" (no DRM)");
            }
            println!(
                "  {:<50} {:>10} {:<28} {} ({})",
                book.relative_path,
                format_bytes(book.size_bytes),
                kind,
                book.metadata.title,
                authors
            );
        }
    }

    session.eject();
    Ok(())
}

fn cmd_upload(
    config: &Config,
    args: &DeviceArgs,
    files: &[PathBuf],
    slot: SlotId,
    overwrite: bool,
) -> anyhow::Result<()> {
    let registry = config.registry();
    let mut session = open_session(config, &registry, args)?;
    session.open()?;

    let readers = ReaderRegistry::builtin();
    let requests: Vec<UploadRequest> = files
        .iter()
        .map(|path| UploadRequest {
            metadata: read_local_metadata(&readers, path, config.settings.read_metadata),
            local_path: path.clone(),
            slot,
            relative_path: None,
        })
        .collect();

    let progress = Progress::new(|event| {
        if let Some(total) = event.total {
            println!("[{}/{}] {}", event.done, total, event.path);
        }
    });

    let outcomes = session.upload_books(
        &requests,
        &UploadOptions { overwrite },
        &progress,
        &CancelToken::new(),
    );

    let mut failed = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(book) => println!("Uploaded: {} -> {}", outcome.local_path.display(), book.relative_path),
            Err(e) => {
                failed += 1;
                eprintln!("Failed: {}: {}", outcome.local_path.display(), e);
            }
        }
    }

    session.eject();
    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, files.len());
    }
    Ok(())
}

fn cmd_delete(
    config: &Config,
    args: &DeviceArgs,
    paths: &[String],
    slot: SlotId,
) -> anyhow::Result<()> {
    let registry = config.registry();
    let mut session = open_session(config, &registry, args)?;
    session.open()?;

    let wanted: HashSet<&str> = paths.iter().map(|p| p.trim_matches('/')).collect();
    let books: Vec<_> = session
        .list_books(slot)?
        .filter(|b| wanted.contains(b.relative_path.as_str()))
        .collect();

    let found: HashSet<&str> = books.iter().map(|b| b.relative_path.as_str()).collect();
    for missing in wanted.difference(&found) {
        println!("Not found: {}", missing);
    }

    let results = session.delete_books(&books, &Progress::none(), &CancelToken::new());
    let mut failed = 0;
    for (book, result) in books.iter().zip(results) {
        match result {
            Ok(()) => println!("Deleted: {}", book.relative_path),
            Err(e) => {
                failed += 1;
                eprintln!("Failed: {}: {}", book.relative_path, e);
            }
        }
    }

    session.eject();
    if failed > 0 {
        anyhow::bail!("{} of {} deletes failed", failed, books.len());
    }
    Ok(())
}

fn open_session(
    config: &Config,
    registry: &DeviceRegistry,
    args: &DeviceArgs,
) -> anyhow::Result<DeviceSession> {
    if let Some(capacity) = args.memory {
        let name = args
            .driver
            .as_deref()
            .unwrap_or(ebook_device::device::FOLDER_DRIVER_NAME);
        let driver = find_driver(registry, name)?;
        let transport = Arc::new(MemoryTransport::new(capacity));
        let mut backends: BTreeMap<SlotId, Box<dyn DeviceFilesystem>> = BTreeMap::new();
        backends.insert(
            SlotId::Main,
            Box::new(MtpFilesystem::new(transport, "memory", MEMORY_STORAGE_ID)),
        );
        return Ok(registry.open_with_backends(&driver, "memory", backends)?);
    }

    if let Some(folder) = &args.folder {
        let path = match config.folder(folder) {
            Some(named) => named.path.clone(),
            None => PathBuf::from(folder),
        };
        return Ok(registry.open_folder(&path)?);
    }

    let Some(name) = &args.driver else {
        anyhow::bail!("Select a device with --folder, --driver or --memory");
    };
    let driver = find_driver(registry, name)?;
    let paths = MountedPaths {
        main: args.main.clone(),
        card_a: args.card_a.clone(),
        card_b: args.card_b.clone(),
        serial: args.serial.clone(),
        platform: Platform::current(),
    };
    Ok(registry.open(&driver, paths)?)
}

fn find_driver(registry: &DeviceRegistry, name: &str) -> anyhow::Result<ebook_device::Driver> {
    registry
        .driver(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Unknown driver: {}. See `ebook-device drivers`.", name))
}

/// Metadata for a local book, from its content when a reader handles it.
fn read_local_metadata(readers: &ReaderRegistry, path: &Path, read_content: bool) -> BookMetadata {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = ebook_device::book::extension_of(&file_name).unwrap_or_default();

    if read_content && let Some(reader) = readers.get(&ext) {
        match std::fs::read(path) {
            Ok(data) => match reader.read_metadata(&data, &file_name) {
                Ok(mi) => return mi,
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Metadata read failed"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to read book"),
        }
    }
    metadata_from_filename(&file_name)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == u64::MAX {
        return "unknown".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
