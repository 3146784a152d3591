use par1_core::encode::{encode, EncodeInput};
use par1_core::host::silent_host;
use par1_core::set::Set;
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::File::create(&path).unwrap().write_all(content).unwrap();
    path
}

fn build(dir: &Path, base: &str, parity: usize, fill: u8) {
    let names = ["x.bin", "y.bin"];
    let mut inputs = Vec::new();
    for name in names {
        let path = write_file(dir, name, &vec![fill; 9000]);
        inputs.push(EncodeInput { path, name: name.to_string(), recoverable: true });
    }
    let mut host = silent_host(1 << 20);
    encode(&inputs, parity, dir, base, &mut host).unwrap();
}

/// Every `ParityVolumeRecord` loaded into a set shares the same `set_hash`
/// (spec.md §3); a volume from an unrelated set in the same directory must
/// not be picked up as a sibling.
#[test]
fn unrelated_set_in_same_directory_is_not_adopted() {
    let dir = tempfile::tempdir().unwrap();
    build(dir.path(), "one", 2, 7);

    // A second, unrelated set in a subdirectory copied up as siblings with
    // par-like extensions would otherwise confuse sibling discovery.
    let other_dir = dir.path().join("unrelated");
    std::fs::create_dir(&other_dir).unwrap();
    build(&other_dir, "two", 1, 9);
    std::fs::copy(other_dir.join("two.p01"), dir.path().join("two.p01")).unwrap();
    std::fs::copy(other_dir.join("two.par"), dir.path().join("two_index.par")).unwrap();

    let set = Set::load(&dir.path().join("one.par")).unwrap();
    assert_eq!(set.parity_volumes.len(), 3); // volume 0 + 2 parity volumes of "one"
    for v in &set.parity_volumes {
        assert_eq!(v.set_hash.0, set.set_hash.0);
    }
}

/// `volume_number` 0 appears at most once; re-scanning the same directory
/// never produces duplicate volume-number entries.
#[test]
fn volume_zero_appears_once_and_numbers_are_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    build(dir.path(), "set", 3, 7);
    let set = Set::load(&dir.path().join("set.par")).unwrap();
    let zero_count = set.parity_volumes.iter().filter(|v| v.volume_number == 0).count();
    assert_eq!(zero_count, 1);

    let mut numbers: Vec<u64> = set.parity_volumes.iter().map(|v| v.volume_number).collect();
    let before_len = numbers.len();
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), before_len, "volume numbers must be unique");
}
