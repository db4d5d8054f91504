use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tagpool::apps::run_associations(std::env::args().skip(1))
}
