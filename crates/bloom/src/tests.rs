use super::*;

fn three_func_filter(size: usize) -> CountingBloomFilter {
    CountingBloomFilter::with_default_hashes(size, 3)
}

// -------------------- Construction --------------------

#[test]
fn new_creates_valid_filter() {
    let bf = three_func_filter(1024);
    assert_eq!(bf.size(), 1024);
    assert_eq!(bf.num_funcs(), 3);
    // two 4-bit counters per byte
    assert_eq!(bf.counters.len(), 512);
}

#[test]
fn odd_size_rounds_up_to_whole_byte() {
    let bf = three_func_filter(7);
    assert_eq!(bf.counters.len(), 4);
    assert_eq!(bf.counter(6), 0);
}

#[test]
#[should_panic(expected = "size must be > 0")]
fn new_panics_on_zero_size() {
    CountingBloomFilter::new(0, vec![sax_hash]);
}

#[test]
#[should_panic(expected = "at least one hash function is required")]
fn new_panics_without_functions() {
    CountingBloomFilter::new(16, Vec::new());
}

#[test]
#[should_panic(expected = "default hash functions are available")]
fn too_many_default_functions_panics() {
    CountingBloomFilter::with_default_hashes(16, DEFAULT_HASHES.len() + 1);
}

// -------------------- Add / Check / Del --------------------

#[test]
fn added_key_is_found() {
    let mut bf = three_func_filter(1024);
    bf.add(b"spam");
    assert!(bf.check(b"spam"));
}

#[test]
fn missing_key_is_not_found() {
    let bf = three_func_filter(1024);
    assert!(!bf.check(b"spam"));
}

#[test]
fn deleted_key_is_gone_when_alone() {
    let mut bf = three_func_filter(1024);
    bf.add(b"spam");
    bf.del(b"spam");
    assert!(!bf.check(b"spam"));
    assert!((0..bf.size()).all(|i| bf.counter(i) == 0));
}

#[test]
fn deleting_one_key_keeps_others() {
    let mut bf = three_func_filter(4096);
    for i in 0..200u32 {
        bf.add(format!("token{}", i).as_bytes());
    }
    bf.del(b"token7");
    for i in (0..200u32).filter(|&i| i != 7) {
        assert!(
            bf.check(format!("token{}", i).as_bytes()),
            "token{} lost after unrelated delete",
            i
        );
    }
}

#[test]
fn shared_slots_survive_delete_of_one_owner() {
    // A single counter shared by every key: deleting one key must not hide
    // the other.
    let mut bf = CountingBloomFilter::new(1, vec![sdbm_hash]);
    bf.add(b"spam");
    bf.add(b"ham");
    bf.del(b"spam");
    assert!(bf.check(b"spam"), "false positive expected on shared slot");
    assert!(bf.check(b"ham"));
    bf.del(b"ham");
    assert!(!bf.check(b"ham"));
}

#[test]
fn repeated_adds_need_repeated_deletes() {
    let mut bf = three_func_filter(1024);
    bf.add(b"k");
    bf.add(b"k");
    bf.del(b"k");
    assert!(bf.check(b"k"));
    bf.del(b"k");
    assert!(!bf.check(b"k"));
}

#[test]
fn many_keys_all_found() {
    let mut bf = CountingBloomFilter::with_default_hashes(16 * 1024, 4);
    for i in 0..1000u64 {
        bf.add(&i.to_le_bytes());
    }
    for i in 0..1000u64 {
        assert!(bf.check(&i.to_le_bytes()), "key {} should be found", i);
    }
}

#[test]
fn empty_key() {
    let mut bf = three_func_filter(64);
    bf.add(b"");
    assert!(bf.check(b""));
}

// -------------------- Saturation --------------------

#[test]
fn counter_saturates_at_max() {
    let mut bf = CountingBloomFilter::new(8, vec![bkdr_hash]);
    let idx = bkdr_hash(b"x") as usize % 8;
    for _ in 0..40 {
        bf.add(b"x");
    }
    assert_eq!(bf.counter(idx), COUNTER_MAX);
    assert!(bf.check(b"x"));
}

#[test]
fn counter_does_not_wrap_below_zero() {
    let mut bf = CountingBloomFilter::new(8, vec![bkdr_hash]);
    let idx = bkdr_hash(b"x") as usize % 8;
    bf.del(b"x");
    assert_eq!(bf.counter(idx), 0);
    assert!(!bf.check(b"x"));
}

#[test]
fn neighbouring_counters_are_independent() {
    // Force two keys into the two nibbles of the same byte.
    fn zero(_: &[u8]) -> u32 {
        0
    }
    fn one(_: &[u8]) -> u32 {
        1
    }
    let mut low = CountingBloomFilter::new(2, vec![zero]);
    low.add(b"a");
    low.add(b"a");
    assert_eq!(low.counter(0), 2);
    assert_eq!(low.counter(1), 0);

    let mut high = CountingBloomFilter::new(2, vec![one]);
    high.add(b"a");
    assert_eq!(high.counter(0), 0);
    assert_eq!(high.counter(1), 1);
    assert_eq!(high.counters[0], 0x10);
}

// -------------------- Hash functions --------------------

#[test]
fn hashes_of_empty_key_are_their_seeds() {
    assert_eq!(sax_hash(b""), 0);
    assert_eq!(sdbm_hash(b""), 0);
    assert_eq!(fnv_hash(b""), 0);
    assert_eq!(rs_hash(b""), 0);
    assert_eq!(js_hash(b""), 1_315_423_911);
    assert_eq!(elf_hash(b""), 0);
    assert_eq!(bkdr_hash(b""), 0);
    assert_eq!(ap_hash(b""), 0xAAAA_AAAA);
}

#[test]
fn known_hash_values() {
    assert_eq!(bkdr_hash(b"ab"), 97 * 131 + 98);
    assert_eq!(sdbm_hash(b"a"), 97);
    assert_eq!(elf_hash(b"a"), 97);
    assert_eq!(rs_hash(b"a"), 97);
}

#[test]
fn ap_hash_mixes_every_byte_the_same_way() {
    let step = |h: u32, b: u8| h ^ ((h << 7) ^ (b as u32).wrapping_mul(h >> 3));
    assert_eq!(ap_hash(b"a"), step(0xAAAA_AAAA, b'a'));
    assert_eq!(ap_hash(b"ab"), step(step(0xAAAA_AAAA, b'a'), b'b'));
    assert_eq!(ap_hash(b"ab"), 0x8555_4CD9);
}

#[test]
fn hash_functions_disagree() {
    let key = b"viagra";
    let values: Vec<u32> = DEFAULT_HASHES.iter().map(|f| f(key)).collect();
    let mut unique = values.clone();
    unique.sort_unstable();
    unique.dedup();
    assert!(unique.len() > 4, "hash set is degenerate: {:?}", values);
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let bf = three_func_filter(100);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("CountingBloomFilter"));
    assert!(debug.contains("size"));
    assert!(debug.contains("num_funcs"));
}
