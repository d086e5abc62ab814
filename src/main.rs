use std::io::Write;
use std::time::Duration;

use log::debug;
use tokio::runtime::Builder;

use tunconf::config;
use tunconf::provider::TransportProvider;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

fn print_usage_and_exit(arg0: String) {
    eprintln!("Usage: {arg0} [--dry-run/-d] [--dial/-c <host:port>] [..] <config filename>");
    std::process::exit(1);
}

fn main() {
    env_logger::builder()
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            let level_style = buf.default_level_style(record.level());
            let sanitized_args = format!("{}", record.args())
                .chars()
                .map(|c| {
                    if c.is_ascii_graphic() || c == ' ' {
                        c
                    } else {
                        '?'
                    }
                })
                .collect::<String>();

            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}] {}",
                timestamp,
                record.level(),
                record.target(),
                sanitized_args
            )
        })
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let arg0 = args.remove(0);
    let mut dry_run = false;
    let mut dial_addresses = vec![];

    while !args.is_empty() && args[0].starts_with("-") {
        if args[0] == "--dry-run" || args[0] == "-d" {
            args.remove(0);
            dry_run = true;
        } else if args[0] == "--dial" || args[0] == "-c" {
            args.remove(0);
            if args.is_empty() {
                eprintln!("Missing dial address.");
                print_usage_and_exit(arg0);
                return;
            }
            dial_addresses.push(args.remove(0));
        } else {
            eprintln!("Invalid argument: {}", args[0]);
            print_usage_and_exit(arg0);
            return;
        }
    }

    if args.len() != 1 {
        eprintln!("Expected exactly one config filename.");
        print_usage_and_exit(arg0);
        return;
    }
    let config_filename = args.remove(0);

    let runtime = match Builder::new_multi_thread().enable_io().enable_time().build() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let node = match config::load_config(&config_filename).await {
            Ok(n) => n,
            Err(e) => {
                eprintln!("Failed to load config: {e}\n");
                print_usage_and_exit(arg0);
                return;
            }
        };
        debug!("{node:#?}");

        let provider = TransportProvider::with_system_dialers();
        let transport = match provider.parse(&node) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Failed to parse config: {e}");
                std::process::exit(1);
            }
        };

        match serde_yaml::to_string(&transport.summary()) {
            Ok(summary) => print!("{summary}"),
            Err(e) => eprintln!("Failed to print transport summary: {e}"),
        }

        if dry_run {
            println!("Finishing dry run, config parsed successfully.");
            return;
        }

        let mut failed = false;
        for address in dial_addresses {
            match tokio::time::timeout(DIAL_TIMEOUT, transport.dial_stream(&address)).await {
                Ok(Ok(_stream)) => println!("{address}: connected"),
                Ok(Err(e)) => {
                    println!("{address}: {e}");
                    failed = true;
                }
                Err(_) => {
                    println!("{address}: timed out after {}s", DIAL_TIMEOUT.as_secs());
                    failed = true;
                }
            }
        }

        if failed {
            std::process::exit(2);
        }
    });
}
