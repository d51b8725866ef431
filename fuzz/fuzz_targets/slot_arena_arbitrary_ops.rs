#![no_main]

use libfuzzer_sys::fuzz_target;
use shardcache::ds::SlotArena;

// Arbitrary insert/remove/get/clear sequences on SlotArena.
//
// The arena never holds more slots than its peak live count, because freed
// slots are reused before the backing vector grows.
fuzz_target!(|data: &[u8]| {
    let mut arena: SlotArena<u32> = SlotArena::new();
    let mut ids = Vec::new();
    let mut peak = 0;

    for pair in data.chunks_exact(2) {
        let value = u32::from(pair[1]);
        match pair[0] % 4 {
            0 => {
                let id = arena.insert(value);
                assert_eq!(arena.get(id), Some(&value));
                ids.push(id);
                peak = peak.max(arena.len());
            },
            1 if !ids.is_empty() => {
                let id = ids.swap_remove(value as usize % ids.len());
                let len = arena.len();
                if arena.remove(id).is_some() {
                    assert_eq!(arena.len(), len - 1);
                }
                assert!(!arena.contains(id));
            },
            2 if !ids.is_empty() => {
                let id = ids[value as usize % ids.len()];
                assert!(arena.get(id).is_some());
            },
            3 => {
                arena.clear();
                ids.clear();
            },
            _ => {},
        }
        assert_eq!(arena.len(), ids.len());
        assert!(arena.slot_count() <= peak);
        assert_eq!(arena.iter().count(), arena.len());
    }
});
