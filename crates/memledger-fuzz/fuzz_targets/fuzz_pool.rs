#![no_main]
use libfuzzer_sys::fuzz_target;
use memledger_core::MemoryPool;

// Header: [object_size, count]; then one byte per operation.
fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let object_size = usize::from(data[0]).max(1);
    let count = usize::from(data[1] % 64).max(1);
    let Ok(pool) = MemoryPool::create(object_size, count, "fuzz") else {
        return;
    };

    let mut held = Vec::new();
    let mut returned = Vec::new();
    for &byte in &data[2..] {
        match byte % 4 {
            0 | 1 => match pool.allocate() {
                Some(obj) => {
                    assert!(pool.owns(obj));
                    assert!(!held.contains(&obj));
                    held.push(obj);
                }
                None => assert_eq!(held.len(), count),
            },
            2 if !held.is_empty() => {
                let obj = held.swap_remove(usize::from(byte) % held.len());
                assert!(pool.give_back(obj).is_ok());
                returned.push(obj);
            }
            _ => {
                // Second return of an already-free object must be refused.
                if let Some(&obj) = returned.last() {
                    if !held.contains(&obj) {
                        assert!(pool.give_back(obj).is_err());
                    }
                }
            }
        }
        let stats = pool.stats();
        assert_eq!(stats.allocated, held.len());
        assert_eq!(stats.free + stats.allocated, count);
    }
});
