use crate::book::BookMetadata;
use crate::device::{
    CancelToken, DetectedDevice, DeviceRegistry, DeviceSession, DriverHooks, MountedPaths,
    Platform, Progress, SessionSettings, SessionState, SlotId, UploadOptions, UploadRequest,
    folder_driver,
};
use crate::error::{DeviceError, Result};
use crate::fs::{
    DeviceFilesystem, MemoryTransport, MtpFilesystem, ObjectHandle, ObjectInfo, ObjectTransport,
    SpaceInfo,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

fn write_file(root: &Path, rel: &str, data: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

fn book(title: &str, author: &str) -> BookMetadata {
    let mut mi = BookMetadata::new(title);
    mi.authors = vec![author.to_string()];
    mi
}

fn open_folder(registry: &DeviceRegistry, dir: &Path) -> DeviceSession {
    let mut session = registry.open_folder(dir).unwrap();
    session.open().unwrap();
    session
}

fn open_driver(registry: &DeviceRegistry, name: &str, paths: MountedPaths) -> DeviceSession {
    let driver = registry.driver(name).unwrap().clone();
    let mut session = registry.open(&driver, paths).unwrap();
    session.open().unwrap();
    session
}

fn memory_session(registry: &DeviceRegistry, name: &str, capacity: u64) -> DeviceSession {
    let driver = registry.driver(name).unwrap().clone();
    let transport = Arc::new(MemoryTransport::new(capacity));
    let mut backends: BTreeMap<SlotId, Box<dyn DeviceFilesystem>> = BTreeMap::new();
    backends.insert(SlotId::Main, Box::new(MtpFilesystem::new(transport, "test", 1)));
    let mut session = registry
        .open_with_backends(&driver, &format!("{name}:memory"), backends)
        .unwrap();
    session.open().unwrap();
    session
}

/// Memory device whose storage can turn read-only or disappear mid-session.
struct FaultyTransport {
    inner: MemoryTransport,
    read_only: AtomicBool,
    removed: AtomicBool,
}

impl FaultyTransport {
    fn new(capacity: u64) -> Self {
        Self {
            inner: MemoryTransport::new(capacity),
            read_only: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        }
    }

    fn check(&self, writes: bool) -> Result<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(DeviceError::Transport("device removed".into()));
        }
        if writes && self.read_only.load(Ordering::SeqCst) {
            return Err(DeviceError::Transport("storage is write protected".into()));
        }
        Ok(())
    }
}

impl ObjectTransport for FaultyTransport {
    fn storage_info(&self, storage: u32) -> Result<SpaceInfo> {
        self.check(false)?;
        self.inner.storage_info(storage)
    }

    fn list_objects(&self, storage: u32, parent: Option<ObjectHandle>) -> Result<Vec<ObjectInfo>> {
        self.check(false)?;
        self.inner.list_objects(storage, parent)
    }

    fn get_object(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        self.check(false)?;
        self.inner.get_object(handle)
    }

    fn send_object(
        &self,
        storage: u32,
        parent: Option<ObjectHandle>,
        name: &str,
        data: &[u8],
    ) -> Result<ObjectInfo> {
        self.check(true)?;
        self.inner.send_object(storage, parent, name, data)
    }

    fn create_folder(
        &self,
        storage: u32,
        parent: Option<ObjectHandle>,
        name: &str,
    ) -> Result<ObjectHandle> {
        self.check(true)?;
        self.inner.create_folder(storage, parent, name)
    }

    fn delete_object(&self, handle: ObjectHandle) -> Result<()> {
        self.check(true)?;
        self.inner.delete_object(handle)
    }

    fn rename_object(&self, handle: ObjectHandle, new_name: &str) -> Result<()> {
        self.check(true)?;
        self.inner.rename_object(handle, new_name)
    }
}

fn faulty_session(registry: &DeviceRegistry, transport: &Arc<FaultyTransport>) -> DeviceSession {
    let driver = registry.driver("Folder Device Interface").unwrap().clone();
    let mut backends: BTreeMap<SlotId, Box<dyn DeviceFilesystem>> = BTreeMap::new();
    backends.insert(
        SlotId::Main,
        Box::new(MtpFilesystem::new(transport.clone(), "faulty", 1)),
    );
    let mut session = registry
        .open_with_backends(&driver, "faulty", backends)
        .unwrap();
    session.open().unwrap();
    session
}

fn listed_paths(session: &mut DeviceSession, slot: SlotId) -> Vec<String> {
    let mut paths: Vec<String> = session
        .list_books(slot)
        .unwrap()
        .map(|b| b.relative_path)
        .collect();
    paths.sort();
    paths
}

#[test]
fn test_list_skips_hidden_and_unsupported_files() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "moby.txt", b"Moby Dick\n\n\nHerman Melville\nCall me Ishmael.\n");
    write_file(dir.path(), "sub/typee.txt", b"plain text");
    write_file(dir.path(), ".trash/old.txt", b"gone");
    write_file(dir.path(), "notes.docx", b"not a book");

    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, dir.path());

    let books: Vec<_> = session.list_books(SlotId::Main).unwrap().collect();
    assert_eq!(books.len(), 2);
    let moby = books.iter().find(|b| b.relative_path == "moby.txt").unwrap();
    assert_eq!(moby.metadata.title, "Moby Dick");
    assert_eq!(moby.metadata.authors, vec!["Herman Melville".to_string()]);
    assert_eq!(moby.format_extension, "txt");
    assert!(books.iter().any(|b| b.relative_path == "sub/typee.txt"));

    assert!(dir.path().join(".metadata.calibre").exists());
}

#[test]
fn test_absent_card_lists_nothing() {
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, dir.path());

    assert_eq!(session.list_books(SlotId::CardA).unwrap().count(), 0);
    let slots = session.slots();
    assert_eq!(slots.len(), 3);
    assert!(slots[0].is_present());
    assert!(!slots[1].is_present());
}

#[test]
fn test_cache_used_until_file_changes() {
    let dir = TempDir::new().unwrap();
    let file = write_file(dir.path(), "moby.txt", b"Moby Dick\n\n\nHerman Melville\n");
    let registry = DeviceRegistry::builtin();

    {
        let mut session = open_folder(&registry, dir.path());
        assert_eq!(session.list_books(SlotId::Main).unwrap().count(), 1);
        assert!(session.cache(SlotId::Main).unwrap().contains("moby.txt"));
    }

    // Edit the stored title; an unchanged file must be served from the cache.
    let cache_path = dir.path().join(".metadata.calibre");
    let mut raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
    raw["books"]["moby.txt"]["title"] = "From Cache".into();
    std::fs::write(&cache_path, serde_json::to_vec(&raw).unwrap()).unwrap();

    let mut session = open_folder(&registry, dir.path());
    let cached = session.list_books(SlotId::Main).unwrap().next().unwrap();
    assert_eq!(cached.metadata.title, "From Cache");

    std::fs::write(&file, b"Typee\n\n\nHerman Melville\nA longer book.\n").unwrap();
    let fresh = session.list_books(SlotId::Main).unwrap().next().unwrap();
    assert_eq!(fresh.metadata.title, "Typee");
}

#[test]
fn test_stale_entries_pruned_after_listing() {
    let dir = TempDir::new().unwrap();
    let gone = write_file(dir.path(), "a.txt", b"a");
    write_file(dir.path(), "b.txt", b"b");
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, dir.path());

    assert_eq!(listed_paths(&mut session, SlotId::Main), vec!["a.txt", "b.txt"]);
    std::fs::remove_file(gone).unwrap();

    assert_eq!(listed_paths(&mut session, SlotId::Main), vec!["b.txt"]);
    let cache = session.cache(SlotId::Main).unwrap();
    assert!(!cache.contains("a.txt"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_partial_listing_keeps_cache() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.txt", b"a");
    write_file(dir.path(), "b.txt", b"b");
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, dir.path());
    assert_eq!(session.list_books(SlotId::Main).unwrap().count(), 2);

    let mut iter = session.list_books(SlotId::Main).unwrap();
    assert_eq!(iter.size_hint(), (2, Some(2)));
    assert!(iter.next().is_some());
    drop(iter);

    assert_eq!(session.cache(SlotId::Main).unwrap().len(), 2);
}

#[test]
fn test_upload_delete_roundtrip() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "dune.txt", b"Arrakis");
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, device.path());

    let metadata = book("Dune", "Frank Herbert");
    let path = session
        .upload_path(SlotId::Main, &metadata, "dune.txt")
        .unwrap();
    assert_eq!(path, "Frank Herbert/Dune/dune.txt");

    let record = session
        .upload(&local, SlotId::Main, &path, &metadata, &UploadOptions::default())
        .unwrap();
    assert_eq!(record.size_bytes, 7);
    assert_eq!(record.metadata.title, "Dune");
    assert_eq!(
        std::fs::read(device.path().join(&path)).unwrap(),
        b"Arrakis"
    );
    assert!(session.cache(SlotId::Main).unwrap().contains(&path));

    let listed: Vec<_> = session.list_books(SlotId::Main).unwrap().collect();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata.authors, vec!["Frank Herbert".to_string()]);

    session.delete(&record).unwrap();
    assert!(!device.path().join(&path).exists());
    assert!(!device.path().join("Frank Herbert").exists());
    assert!(!session.cache(SlotId::Main).unwrap().contains(&path));
    assert!(listed_paths(&mut session, SlotId::Main).is_empty());

    // Already gone.
    session.delete(&record).unwrap();
}

#[test]
fn test_cache_survives_reopen() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "dune.txt", b"Arrakis");
    let registry = DeviceRegistry::builtin();

    {
        let mut session = open_folder(&registry, device.path());
        let mut metadata = book("Dune", "Frank Herbert");
        metadata.series = Some("Dune Chronicles".into());
        metadata.series_index = Some(1.0);
        session
            .upload(&local, SlotId::Main, "dune.txt", &metadata, &UploadOptions::default())
            .unwrap();
        session.eject();
        assert!(matches!(session.state(), SessionState::Ejected));
    }

    let mut session = open_folder(&registry, device.path());
    assert!(session.cache(SlotId::Main).unwrap().contains("dune.txt"));
    let record = session.list_books(SlotId::Main).unwrap().next().unwrap();
    assert_eq!(record.metadata.title, "Dune");
    assert_eq!(record.metadata.series.as_deref(), Some("Dune Chronicles"));
    assert_eq!(record.metadata.series_index, Some(1.0));
}

#[test]
fn test_unsupported_format_changes_nothing() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "report.docx", b"docx");
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, device.path());

    let err = session
        .upload(
            &local,
            SlotId::Main,
            "report.docx",
            &book("Report", "Me"),
            &UploadOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::UnsupportedFormat(_)));
    assert_eq!(std::fs::read_dir(device.path()).unwrap().count(), 0);
    assert!(session.cache(SlotId::Main).unwrap().is_empty());
}

#[test]
fn test_existing_destination_needs_overwrite() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let first = write_file(host.path(), "a/book.txt", b"first");
    let second = write_file(host.path(), "b/book.txt", b"second version");
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, device.path());
    let mi = book("Book", "Author");

    session
        .upload(&first, SlotId::Main, "book.txt", &mi, &UploadOptions::default())
        .unwrap();
    let err = session
        .upload(&second, SlotId::Main, "book.txt", &mi, &UploadOptions::default())
        .unwrap_err();
    assert!(matches!(err, DeviceError::PathConflict(_)));
    assert_eq!(std::fs::read(device.path().join("book.txt")).unwrap(), b"first");

    let record = session
        .upload(&second, SlotId::Main, "book.txt", &mi, &UploadOptions { overwrite: true })
        .unwrap();
    assert_eq!(record.size_bytes, 14);
}

#[test]
fn test_upload_too_large_for_slot() {
    let host = TempDir::new().unwrap();
    let big = host.path().join("big.epub");
    let file = std::fs::File::create(&big).unwrap();
    file.set_len(150 * MB).unwrap();

    let registry = DeviceRegistry::builtin();
    let mut session = memory_session(&registry, "Nook Device Interface", 100 * MB);
    let free_before = session.slot(SlotId::Main).unwrap().free_bytes;
    assert_eq!(free_before, 100 * MB);

    let err = session
        .upload(
            &big,
            SlotId::Main,
            "my documents/big.epub",
            &book("Big", "Author"),
            &UploadOptions::default(),
        )
        .unwrap_err();
    match err {
        DeviceError::InsufficientSpace { needed, available } => {
            assert_eq!(needed, 150 * MB);
            assert_eq!(available, 100 * MB);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(session.slot(SlotId::Main).unwrap().free_bytes, free_before);
    assert!(listed_paths(&mut session, SlotId::Main).is_empty());
}

#[test]
fn test_upload_to_missing_card() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "book.txt", b"text");
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, device.path());

    let err = session
        .upload(&local, SlotId::CardB, "book.txt", &book("B", "A"), &UploadOptions::default())
        .unwrap_err();
    assert!(matches!(err, DeviceError::SlotUnavailable(SlotId::CardB)));
}

#[test]
fn test_kindle_card_upload_and_sidecars() {
    let main = TempDir::new().unwrap();
    let card = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "dune.mobi", b"mobi data");
    let registry = DeviceRegistry::builtin();
    let paths = MountedPaths {
        card_a: Some(card.path().to_path_buf()),
        platform: Platform::Unix,
        ..MountedPaths::main(main.path())
    };
    let mut session = open_driver(&registry, "Kindle Device Interface", paths);
    assert!(session.slot(SlotId::CardA).unwrap().is_present());

    let mi = book("Dune", "Frank Herbert");
    let path = session.upload_path(SlotId::CardA, &mi, "dune.mobi").unwrap();
    assert_eq!(path, "documents/Frank Herbert/Dune/dune.mobi");
    let record = session
        .upload(&local, SlotId::CardA, &path, &mi, &UploadOptions::default())
        .unwrap();
    assert_eq!(record.slot, SlotId::CardA);

    write_file(card.path(), "documents/Frank Herbert/Dune/dune.mbp", b"notes");
    write_file(card.path(), "documents/Frank Herbert/Dune/dune.tan", b"tan");
    write_file(card.path(), "documents/keep.mobi", b"other");

    session.delete(&record).unwrap();
    assert!(!card.path().join("documents/Frank Herbert").exists());
    assert!(card.path().join("documents/keep.mobi").exists());
    assert!(main.path().read_dir().unwrap().next().is_none());
}

#[test]
fn test_kindle_wireless_title_from_file_name() {
    let main = TempDir::new().unwrap();
    write_file(
        main.path(),
        "documents/Dracula-asin_B000FC1BN8-type_EBOK-v_0.azw",
        b"azw",
    );
    let registry = DeviceRegistry::builtin();
    let mut session = open_driver(
        &registry,
        "Kindle Device Interface",
        MountedPaths::main(main.path()),
    );

    let record = session.list_books(SlotId::Main).unwrap().next().unwrap();
    assert_eq!(record.metadata.title, "Dracula");
}

#[test]
fn test_nook_writes_jpeg_cover() {
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "dune.epub", b"epub bytes");
    let registry = DeviceRegistry::builtin();
    let mut session = memory_session(&registry, "Nook Device Interface", 10 * MB);

    let mi = book("Dune", "Frank Herbert");
    let path = session.upload_path(SlotId::Main, &mi, "dune.epub").unwrap();
    assert_eq!(path, "my documents/Frank Herbert/Dune/dune.epub");
    let record = session
        .upload(&local, SlotId::Main, &path, &mi, &UploadOptions::default())
        .unwrap();

    let fs = session.filesystem(SlotId::Main).unwrap();
    let jpeg = fs.read("my documents/Frank Herbert/Dune/dune.jpg").unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (96, 144));

    session.delete(&record).unwrap();
    let fs = session.filesystem(SlotId::Main).unwrap();
    assert!(!fs.exists("my documents/Frank Herbert/Dune/dune.jpg"));
    assert!(!fs.exists("my documents/Frank Herbert"));
}

#[test]
fn test_cybook_writes_t2b_thumbnail() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "dune.epub", b"epub bytes");
    let registry = DeviceRegistry::builtin();
    let mut session = open_driver(
        &registry,
        "Cybook Gen 3 / Opus Device Interface",
        MountedPaths::main(device.path()),
    );

    session
        .upload(&local, SlotId::Main, "eBooks/dune.epub", &book("Dune", "F"), &UploadOptions::default())
        .unwrap();
    let t2b = std::fs::read(device.path().join("eBooks/dune_6090.t2b")).unwrap();
    assert_eq!(t2b.len(), 96 * 144 / 4);
}

#[test]
fn test_batch_upload_stops_after_cancel() {
    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let registry = DeviceRegistry::builtin();
    let mut session = open_folder(&registry, device.path());

    let requests: Vec<UploadRequest> = ["one", "two", "three"]
        .iter()
        .map(|name| UploadRequest {
            local_path: write_file(host.path(), &format!("{name}.txt"), name.as_bytes()),
            slot: SlotId::Main,
            relative_path: None,
            metadata: book(name, "Author"),
        })
        .collect();

    let cancel = CancelToken::new();
    let token = cancel.clone();
    let progress = Progress::new(move |event| {
        if event.done == 1 {
            token.cancel();
        }
    });

    let outcomes = session.upload_books(&requests, &UploadOptions::default(), &progress, &cancel);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(DeviceError::Cancelled)));
    assert!(matches!(outcomes[2].result, Err(DeviceError::Cancelled)));
    assert_eq!(listed_paths(&mut session, SlotId::Main), vec!["Author/one/one.txt"]);
}

#[test]
fn test_listing_on_worker_thread_reports_progress() {
    let dir = TempDir::new().unwrap();
    for name in ["a", "b", "c"] {
        write_file(dir.path(), &format!("{name}.txt"), name.as_bytes());
    }
    let registry = DeviceRegistry::builtin();
    let session = open_folder(&registry, dir.path());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let count = std::thread::spawn(move || {
        let mut session = session;
        let progress = Progress::new(move |event| sink.lock().push((event.done, event.total)));
        session
            .list_books_with_progress(SlotId::Main, progress)
            .unwrap()
            .count()
    })
    .join()
    .unwrap();

    assert_eq!(count, 3);
    assert_eq!(
        *events.lock(),
        vec![(1, Some(3)), (2, Some(3)), (3, Some(3))]
    );
}

#[test]
fn test_session_lifecycle() {
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::builtin();
    let mut session = registry.open_folder(dir.path()).unwrap();

    assert!(matches!(session.state(), SessionState::Unopened));
    assert!(matches!(
        session.list_books(SlotId::Main),
        Err(DeviceError::NotConnected)
    ));

    write_file(dir.path(), "a.txt", b"a");
    session.open().unwrap();
    assert_eq!(session.list_books(SlotId::Main).unwrap().count(), 1);
    session.open().unwrap();
    assert!(session.is_open());
    assert_eq!(session.cache(SlotId::Main).unwrap().len(), 1);
    assert_eq!(session.list_books(SlotId::Main).unwrap().count(), 1);
    session.sync().unwrap();

    session.eject();
    session.eject();
    assert!(matches!(session.open(), Err(DeviceError::NotConnected)));
    assert!(matches!(session.sync(), Err(DeviceError::NotConnected)));
    assert!(session.slot(SlotId::Main).is_none());
}

#[test]
fn test_second_session_on_same_device_is_busy() {
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::builtin();
    let mut first = open_folder(&registry, dir.path());

    assert!(matches!(
        registry.open_folder(dir.path()),
        Err(DeviceError::Busy(_))
    ));

    first.eject();
    assert!(registry.open_folder(dir.path()).is_ok());
}

#[test]
fn test_first_registered_driver_wins() {
    let eb600_usb = DetectedDevice::Usb {
        vendor_id: 0x1f85,
        product_id: 0x1688,
        bcd: Some(0x110),
        manufacturer: None,
        product: None,
        platform: Platform::Unix,
    };

    let registry = DeviceRegistry::builtin();
    let driver = registry.identify(&eb600_usb).unwrap();
    assert_eq!(driver.name(), "Netronix EB600 Device Interface");

    let cool_er = registry.driver("Cool-er Device Interface").unwrap().clone();
    let eb600 = registry.driver("Netronix EB600 Device Interface").unwrap().clone();
    let reordered = DeviceRegistry::new(vec![cool_er, eb600]);
    assert_eq!(
        reordered.identify(&eb600_usb).unwrap().name(),
        "Cool-er Device Interface"
    );
}

#[test]
fn test_folder_device_never_identified() {
    let registry = DeviceRegistry::new(vec![folder_driver()]);
    let volume = DetectedDevice::Volume {
        label: "Folder".into(),
        platform: Platform::Windows,
    };
    assert!(registry.identify(&volume).is_none());
    assert!(registry.driver("folder device interface").is_some());
}

#[test]
fn test_windows_volume_identifies_nook() {
    let registry = DeviceRegistry::builtin();
    let volume = DetectedDevice::Volume {
        label: r"USBSTOR\DISK&VEN_B&N&PROD_NOOK&REV_0322".into(),
        platform: Platform::Windows,
    };
    let driver = registry.identify(&volume).unwrap();
    assert_eq!(driver.name(), "Nook Device Interface");
}

#[test]
fn test_upload_outside_book_dir_rejected() {
    let main = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "a.mobi", b"mobi data");
    let registry = DeviceRegistry::builtin();
    let mut session = open_driver(
        &registry,
        "Kindle Device Interface",
        MountedPaths::main(main.path()),
    );
    let mi = book("A", "Author");

    for dest in ["a.mobi", "documentsx/a.mobi", "documents/.hidden/a.mobi"] {
        let err = session
            .upload(&local, SlotId::Main, dest, &mi, &UploadOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidPath(_)), "{dest}: {err}");
    }
    assert!(main.path().read_dir().unwrap().next().is_none());
    assert!(session.cache(SlotId::Main).unwrap().is_empty());

    session
        .upload(&local, SlotId::Main, "documents/a.mobi", &mi, &UploadOptions::default())
        .unwrap();
    assert_eq!(listed_paths(&mut session, SlotId::Main), vec!["documents/a.mobi"]);
}

#[test]
fn test_flat_device_rejects_nested_upload() {
    let mut driver = folder_driver();
    driver.identity.name = "Flat Reader".into();
    driver.capabilities.hooks = DriverHooks::Generic;
    driver.capabilities.supports_subdirectories = false;
    driver.capabilities.main_dir = "Books".into();
    let registry = DeviceRegistry::new(vec![driver.clone()]);

    let device = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "a.txt", b"text");
    let mut session = registry.open(&driver, MountedPaths::main(device.path())).unwrap();
    session.open().unwrap();
    let mi = book("Title", "Author");

    for dest in ["Books/Author/Title/a.txt", "Author/Title/a.txt"] {
        let err = session
            .upload(&local, SlotId::Main, dest, &mi, &UploadOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidPath(_)), "{dest}: {err}");
    }
    assert!(!device.path().join("Books").exists());
    assert!(!device.path().join("Author").exists());

    let path = session.upload_path(SlotId::Main, &mi, "a.txt").unwrap();
    assert_eq!(path, "Books/a.txt");
    session
        .upload(&local, SlotId::Main, &path, &mi, &UploadOptions::default())
        .unwrap();
    assert_eq!(listed_paths(&mut session, SlotId::Main), vec!["Books/a.txt"]);
}

#[test]
fn test_delete_books_continues_past_failure() {
    let host = TempDir::new().unwrap();
    let a = write_file(host.path(), "a.txt", b"first");
    let b = write_file(host.path(), "b.txt", b"second");
    let transport = Arc::new(FaultyTransport::new(10 * MB));
    let registry = DeviceRegistry::builtin();
    let mut session = faulty_session(&registry, &transport);
    let options = UploadOptions::default();

    let first = session
        .upload(&a, SlotId::Main, "a.txt", &book("A", "Author"), &options)
        .unwrap();
    let second = session
        .upload(&b, SlotId::Main, "b.txt", &book("B", "Author"), &options)
        .unwrap();
    session.delete(&second).unwrap();

    transport.read_only.store(true, Ordering::SeqCst);
    let results = session.delete_books(
        &[first.clone(), second.clone()],
        &Progress::none(),
        &CancelToken::new(),
    );
    assert_eq!(results.len(), 2);
    match &results[0] {
        Err(DeviceError::Delete { path, source }) => {
            assert_eq!(path, "a.txt");
            assert!(matches!(**source, DeviceError::Transport(_)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(results[1].is_ok());
    assert!(session.filesystem(SlotId::Main).unwrap().exists("a.txt"));
    assert!(session.cache(SlotId::Main).unwrap().contains("a.txt"));

    transport.read_only.store(false, Ordering::SeqCst);
    session.delete(&first).unwrap();
    assert!(listed_paths(&mut session, SlotId::Main).is_empty());
}

#[test]
fn test_eject_survives_failed_cache_flush() {
    let host = TempDir::new().unwrap();
    let local = write_file(host.path(), "a.txt", b"text");
    let transport = Arc::new(FaultyTransport::new(10 * MB));
    let registry = DeviceRegistry::builtin().with_settings(SessionSettings {
        flush_on_mutation: false,
        ..SessionSettings::default()
    });
    let mut session = faulty_session(&registry, &transport);

    session
        .upload(&local, SlotId::Main, "a.txt", &book("A", "Author"), &UploadOptions::default())
        .unwrap();
    assert!(session.cache(SlotId::Main).unwrap().is_dirty());
    let key = session.key().unwrap().to_string();

    transport.removed.store(true, Ordering::SeqCst);
    session.eject();
    assert_eq!(session.state(), SessionState::Ejected);
    assert!(!registry.is_busy(&key));

    transport.removed.store(false, Ordering::SeqCst);
    let fs = MtpFilesystem::new(transport.clone(), "faulty", 1);
    assert!(fs.exists("a.txt"));
    assert!(!fs.exists(".metadata.calibre"));
}

#[test]
fn test_session_debug_names_driver_and_slots() {
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::builtin();
    let session = open_folder(&registry, dir.path());
    let shown = format!("{session:?}");
    assert!(shown.contains("Folder Device Interface"));
    assert!(shown.contains("Main"));
    assert!(shown.contains("Open"));
}
