use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use disk_sort::buffer::mem::MemoryLimitedBufferBuilder;
use disk_sort::{ChunkBufferBuilder, ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder, LineReader, SortError};

struct SortOptions {
    tmp_dir: Option<String>,
    threads: Option<usize>,
    unique: bool,
}

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let block_size: usize = arg_parser.value_of_t_or_exit("block_size");
    let chunk_size: Option<&str> = arg_parser.value_of("chunk_size");
    let options = SortOptions {
        tmp_dir: arg_parser.value_of("tmp_dir").map(String::from),
        threads: arg_parser
            .is_present("threads")
            .then(|| arg_parser.value_of_t_or_exit("threads")),
        unique: arg_parser.is_present("unique"),
    };

    let input = arg_parser.value_of("input").expect("value is required");
    let input_stream: Box<dyn BufRead> = if input == "-" {
        Box::new(io::BufReader::new(io::stdin()))
    } else {
        match fs::File::open(input) {
            Ok(file) => Box::new(io::BufReader::new(file)),
            Err(err) => {
                log::error!("input file opening error: {}", err);
                process::exit(1);
            }
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");
    let output_stream: Box<dyn Write> = if output == "-" {
        Box::new(io::stdout())
    } else {
        match fs::File::create(output) {
            Ok(file) => Box::new(file),
            Err(err) => {
                log::error!("output file creation error: {}", err);
                process::exit(1);
            }
        }
    };

    let result = match chunk_size {
        Some(chunk_size) => {
            let chunk_size = chunk_size.parse::<ByteSize>().expect("value is pre-validated").as_u64();
            sort(MemoryLimitedBufferBuilder::new(chunk_size), &options, input_stream, output_stream)
        }
        None => sort(
            LimitedBufferBuilder::new(block_size, false),
            &options,
            input_stream,
            output_stream,
        ),
    };

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

fn sort<B: ChunkBufferBuilder>(
    buffer_builder: B,
    options: &SortOptions,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
) -> Result<usize, SortError> {
    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_buffer(buffer_builder)
        .with_unique(options.unique);

    if let Some(threads) = options.threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = &options.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter: ExternalSorter<io::Error, B> = sorter_builder.build()?;

    sorter.sort_into(LineReader::new(input), output)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("disk-sort")
        .about("sorts text lines using bounded memory and a scratch directory")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted, - for stdin")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, - for stdout")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel chunk sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("block_size")
                .short('b')
                .long("block-size")
                .help("number of lines sorted in memory at a time")
                .takes_value(true)
                .default_value("5000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Block size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Block size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("memory limit per chunk, overrides block size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("unique")
                .short('u')
                .long("unique")
                .help("output each distinct line once"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
