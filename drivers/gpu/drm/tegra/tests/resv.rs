// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Concurrent submissions over overlapping buffer sets.

mod common;

use common::{buf, Device};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tegra_drm::uapi::SubmitBufFlags;

const THREADS: usize = 4;
const JOBS: usize = 10;
const BUFFERS: usize = 4;

#[test]
fn overlapping_buffer_sets() {
    let dev = Device::new();
    let owner = dev.client();

    let bos: Vec<_> = (0..BUFFERS)
        .map(|_| {
            let (handle, _) = owner.create_mapped(0x1000);
            owner.file.gem_lookup(handle).unwrap()
        })
        .collect();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let bos = &bos;
                let dev = &dev;
                s.spawn(move || {
                    let client = dev.client();
                    let mappings: Vec<u32> = bos
                        .iter()
                        .map(|bo| client.map(client.file.gem_handle_create(bo.clone()).unwrap()))
                        .collect();

                    // Seeded per thread, so that failures reproduce.
                    let mut rng = StdRng::seed_from_u64(0x5eed + t as u64);
                    let mut last = 0;
                    for _ in 0..JOBS {
                        let mut bufs = Vec::new();
                        for (i, &mapping) in mappings.iter().enumerate() {
                            let flags = match rng.gen_range(0..3) {
                                0 => continue,
                                1 => SubmitBufFlags::RESV_READ,
                                _ => SubmitBufFlags::RESV_WRITE,
                            };
                            bufs.push(buf(mapping, flags, i as u32));
                        }
                        // Same buffer twice, once for reading and once for writing.
                        if rng.gen_ratio(1, 4) {
                            bufs.push(buf(mappings[0], SubmitBufFlags::RESV_READ, 0));
                            bufs.push(buf(mappings[0], SubmitBufFlags::RESV_WRITE, 1));
                        }

                        let data = client.submit(&[0; BUFFERS], &bufs).unwrap();
                        last = data.syncpt_incrs[0].fence_value;
                    }

                    (client.syncpt(), last)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    dev.sim.run_all();

    for (sp, last) in &results {
        assert_eq!(sp.wait(*last, Duration::from_secs(5)), Ok(*last));
        assert_eq!(sp.read_min(), sp.read_max());
    }
    for bo in &bos {
        assert!(bo.resv().test_signaled(true));
    }
}
