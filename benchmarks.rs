// The MIT License (MIT)

// Copyright (c) 2014 Y. T. CHUNG <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

extern crate env_logger;
extern crate hanger;

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use hanger::{Config, MemStore, Outcome, Updater};

// (writers, rounds, value length, parallel fetch)
const TESTS: &[(usize, usize, usize, bool)] = &[
    (1, 2048, 64, false),
    (1, 2048, 64, true),
    (4, 1024, 64, false),
    (4, 1024, 64, true),
    (16, 512, 1024, false),
    (16, 512, 1024, true),
    (64, 128, 4096, true),
];

fn main() {
    env_logger::init();

    println!("Writers,Rounds,ValueLength,Parallel,Updated,Conflict,Error,Time,UPS");
    for &(writers, rounds, value_size, parallel) in TESTS.iter() {
        let config = Config {
            parallel: parallel,
            ..Config::default()
        };
        let updater = Arc::new(Updater::with_config(MemStore::new(), config));
        let h = updater.initialize(vec![0u8; value_size]).unwrap();

        let begin = Instant::now();
        let handlers: Vec<_> = (0..writers)
            .map(|_| {
                let (updater, h) = (updater.clone(), h.clone());
                thread::spawn(move || {
                    let (mut updated, mut conflict, mut error) = (0usize, 0usize, 0usize);
                    for _ in 0..rounds {
                        let head = match updater.head(&h) {
                            Ok((head, _)) => head,
                            Err(..) => {
                                error += 1;
                                continue;
                            }
                        };
                        let value: Vec<u8> = (0..value_size).map(|_| fastrand::u8(..)).collect();
                        match updater.update(&h, &head, value) {
                            Ok(Outcome::Updated(..)) => updated += 1,
                            Ok(Outcome::Conflict { .. }) => conflict += 1,
                            Err(..) => error += 1,
                        }
                    }
                    (updated, conflict, error)
                })
            })
            .collect();

        let (mut updated, mut conflict, mut error) = (0, 0, 0);
        for hdl in handlers {
            let (u, c, e) = hdl.join().unwrap();
            updated += u;
            conflict += c;
            error += e;
        }
        let secs = begin.elapsed().as_secs_f64();
        println!(
            "{},{},{},{},{},{},{},{:.3},{:.0}",
            writers,
            rounds,
            value_size,
            parallel,
            updated,
            conflict,
            error,
            secs,
            (updated + conflict) as f64 / secs
        );
    }
}
