use env_logger::Builder;
use log::info;
use quadseg::{Operation, OperationParams, Workspace};

fn main() {
    Builder::from_default_env().format_timestamp_nanos().init();

    let mut args = std::env::args().skip(1);
    let operation: Operation = args
        .next()
        .unwrap_or_else(|| "split-and-merge".to_string())
        .parse()
        .unwrap();
    let input = args
        .next()
        .unwrap_or_else(|| "test_image/input.png".to_string());

    let mut workspace = Workspace::open(&input).unwrap();
    let params = OperationParams::new(5).unwrap().with_threshold(128);

    info!("{}: {}", operation.label(), operation.description());
    workspace.apply(operation, &params).unwrap();

    let output = format!("test_image/{}", workspace.default_output_name());
    workspace.save(&output).unwrap();
    info!("Saved {output}");
}
