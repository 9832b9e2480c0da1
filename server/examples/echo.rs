//! A minimal host loop: bind, pull requests, echo back the method, path,
//! and headers of whatever arrives. Run with `cargo run --example echo`
//! and hit it with `curl -v http://127.0.0.1:7878/anything`.

use std::time::Duration;

use loopserve_server::config::Config;
use loopserve_server::response::Response;
use loopserve_server::server::Server;
use loopserve_parser::Status;

fn main() {
    env_logger::init();

    let config = Config::builder().host("127.0.0.1").port(7878).build();
    let mut server = Server::new(config);
    if !server.start() {
        eprintln!("failed to start server");
        std::process::exit(1);
    }
    println!("listening on http://127.0.0.1:7878");

    loop {
        if server.has_request() {
            let request = server.get_request().expect("has_request() said yes");
            let mut body = format!("{} {}\n", request.method(), request.target());
            for (name, value) in request.headers().iter() {
                body.push_str(&format!("{name}: {value}\n"));
            }
            server.respond(
                Response::new(Status::Ok)
                    .header("Content-Type", "text/plain")
                    .with_body(body),
            );
            continue;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
