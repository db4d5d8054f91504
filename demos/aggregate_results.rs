use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tagpool::apps::run_aggregate_results(std::env::args().skip(1))
}
