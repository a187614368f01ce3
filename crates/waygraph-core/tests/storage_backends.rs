//! Segmented store behaviour shared by every backend

use tempfile::TempDir;
use waygraph_core::Error;
use waygraph_core::storage::{DaType, Directory};

const STORING: [DaType; 3] = [DaType::RamStore, DaType::Mmap, DaType::OffHeapStore];

fn create_test_dir(tmp: &TempDir, da_type: DaType) -> Directory {
    Directory::new(tmp.path(), da_type)
        .unwrap()
        .with_segment_size(64)
        .unwrap()
}

#[test]
fn test_values_straddle_segments() {
    let dir = Directory::in_memory().with_segment_size(64).unwrap();
    for da_type in [DaType::Ram, DaType::OffHeap] {
        let mut da = dir.create_with(da_type.as_str(), da_type, 64).unwrap();
        da.create(10).unwrap();
        assert_eq!(da.segment_count(), 1);
        assert!(da.ensure_capacity(130).unwrap());
        assert_eq!(da.segment_count(), 3);
        assert!(!da.ensure_capacity(100).unwrap());

        da.set_u32(62, 0xDEAD_BEEF).unwrap();
        da.set_short(127, -2).unwrap();
        assert_eq!(da.get_u32(62).unwrap(), 0xDEAD_BEEF);
        assert_eq!(da.get_short(127).unwrap(), -2);
        assert!(matches!(da.get_u32(190), Err(Error::OutOfRange { .. })));

        da.trim_to(64).unwrap();
        assert_eq!(da.segment_count(), 1);
        assert!(matches!(da.get_u32(62), Err(Error::OutOfRange { .. })));
        da.close();
        assert!(matches!(da.get_int(0), Err(Error::Closed(_))));
    }
}

#[test]
fn test_flush_and_reload_every_storing_backend() {
    for da_type in STORING {
        let tmp = TempDir::new().unwrap();
        {
            let dir = create_test_dir(&tmp, da_type);
            let mut da = dir.create("data").unwrap();
            da.create(200).unwrap();
            da.set_int(60, -123_456).unwrap();
            da.set_bytes(120, b"waygraph").unwrap();
            da.set_header(0, 42).unwrap();
            da.set_header(19, -1).unwrap();
            da.flush().unwrap();
            dir.flush_manifest().unwrap();
            da.close();
        }

        let dir = create_test_dir(&tmp, da_type);
        assert_eq!(dir.resolve("data").da_type, da_type);
        let mut da = dir.create("data").unwrap();
        assert!(da.load_existing().unwrap(), "{da_type} did not reload");
        assert_eq!(da.segment_count(), 4);
        assert_eq!(da.get_int(60).unwrap(), -123_456);
        let mut name = [0u8; 8];
        da.get_bytes(120, &mut name).unwrap();
        assert_eq!(&name, b"waygraph");
        assert_eq!(da.get_header(0).unwrap(), 42);
        assert_eq!(da.get_header(19).unwrap(), -1);
    }
}

#[test]
fn test_copy_between_backends() {
    let tmp = TempDir::new().unwrap();
    let dir = create_test_dir(&tmp, DaType::Mmap);
    let mut source = dir.create_with("source", DaType::Ram, 64).unwrap();
    source.create(100).unwrap();
    source.set_u32(96, 7).unwrap();
    source.set_header(3, 9).unwrap();

    let mut target = dir.create("target").unwrap();
    target.create(10).unwrap();
    source.copy_to(target.as_mut()).unwrap();
    assert_eq!(target.get_u32(96).unwrap(), 7);
    assert_eq!(target.get_header(3).unwrap(), 9);
}

#[test]
fn test_missing_files_do_not_load() {
    let tmp = TempDir::new().unwrap();
    for da_type in STORING {
        let dir = create_test_dir(&tmp, da_type);
        let mut da = dir.create("absent").unwrap();
        assert!(!da.load_existing().unwrap());
    }
}
