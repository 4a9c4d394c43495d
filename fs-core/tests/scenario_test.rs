use chainfs::{EntryKind, FileSystem, FsConfig, FsError, MemoryStore};

fn fresh() -> FileSystem<MemoryStore> {
    let mut fs = FileSystem::new(MemoryStore::new(), FsConfig::default());
    fs.create_disk(1 << 20).unwrap();
    fs.format(512).unwrap();
    fs
}

#[test]
fn test_end_to_end_scenario() {
    env_logger::builder().is_test(true).try_init().ok();

    let mut fs = fresh();
    fs.mkdir("a").unwrap();
    fs.touch("a/b.txt").unwrap();
    fs.open("w", "a/b.txt").unwrap();
    fs.write("a/b.txt", b"hello").unwrap();
    fs.close("a/b.txt").unwrap();
    fs.open("r", "a/b.txt").unwrap();
    assert_eq!(fs.read("a/b.txt", 5).unwrap(), b"hello");
}

#[test]
fn test_relative_paths_follow_cwd() {
    let mut fs = fresh();
    fs.mkdir("home").unwrap();
    fs.mkdir("home/user").unwrap();
    fs.cd("home/user").unwrap();
    fs.touch("todo").unwrap();
    fs.touch("../shared").unwrap();
    fs.mkdir("/tmp").unwrap();

    let home: Vec<_> = fs
        .ls(Some("/home"))
        .unwrap()
        .into_iter()
        .map(|e| (e.name, e.kind))
        .collect();
    assert_eq!(
        home,
        [
            (".".to_string(), EntryKind::Directory),
            ("..".to_string(), EntryKind::Directory),
            ("user".to_string(), EntryKind::Directory),
            ("shared".to_string(), EntryKind::File),
        ]
    );
    assert_eq!(fs.stat("/home/user/todo").unwrap().kind, EntryKind::File);
    assert_eq!(fs.pwd(), "/home/user");
}

#[test]
fn test_failures_do_not_end_the_session() {
    let mut fs = fresh();
    let failures = [
        fs.mkdir("x/y").unwrap_err(),
        fs.rm("ghost").unwrap_err(),
        fs.close("ghost").unwrap_err(),
        fs.cd("ghost").unwrap_err(),
    ];
    assert!(matches!(failures[0], FsError::NoSuchDirectory(_)));
    assert!(matches!(failures[1], FsError::NotFound(_)));
    assert!(matches!(failures[2], FsError::NotFound(_)));
    assert!(matches!(failures[3], FsError::NotFound(_)));

    fs.mkdir("x").unwrap();
    fs.mkdir("x/y").unwrap();
    assert_eq!(fs.ls(Some("x")).unwrap().len(), 3);
}

#[test]
fn test_reformat_wipes_everything() {
    let mut fs = fresh();
    let pristine = fs.statfs().unwrap();
    fs.mkdir("a").unwrap();
    fs.touch("a/f").unwrap();
    fs.open("w", "a/f").unwrap();

    fs.format(512).unwrap();
    assert!(fs.open_files().is_empty());
    assert_eq!(fs.ls(None).unwrap().len(), 2);
    assert_eq!(fs.statfs().unwrap(), pristine);
}
