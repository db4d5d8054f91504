use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tagpool::apps::run_qc_decide(std::env::args().skip(1))
}
