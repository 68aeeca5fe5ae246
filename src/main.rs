use log::error;

use wgpu_phoenix::{render, Config};

fn main() {
    env_logger::init();

    let config = Config::default();
    if let Err(err) = render::render(&config) {
        error!("{}", err);
        std::process::exit(1);
    }
}
