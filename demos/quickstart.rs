use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use disk_sort::{ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder, LineReader};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
    let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());

    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .with_buffer(LimitedBufferBuilder::new(5000, true))
        .build()
        .unwrap();

    let sorted = sorter.sort(LineReader::new(input_reader)).unwrap();

    for line in sorted.map(Result::unwrap) {
        output_writer.write_all(format!("{}\n", line).as_bytes()).unwrap();
    }
    output_writer.flush().unwrap();
}
