#[allow(non_snake_case)]
pub mod Examples;
#[allow(non_snake_case)]
pub mod Propagator;
#[allow(non_snake_case)]
pub mod Utils;
pub mod settings;

use Examples::profile_examples::profile_examples;
use Utils::logger::init_logger;
use simplelog::LevelFilter;

pub fn main() {
    init_logger(LevelFilter::Info);
    let task: usize = 1;
    profile_examples(task);
}
