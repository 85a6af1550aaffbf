use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::str::FromStr;

use riptide::TcpStack;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let stack = TcpStack::new(
        "tun0",
        Ipv4Addr::from_str("10.10.10.10").unwrap(),
        Ipv4Addr::from_str("255.255.255.0").unwrap(),
    )
    .unwrap();

    let listener = stack.bind(9090).unwrap();

    println!(">>> Waiting for incoming connections...");
    let mut stream = listener.accept().unwrap();
    println!(">>> Connection accepted");

    loop {
        let mut buf = [0u8; 1500];
        let n = stream.read(&mut buf[..]).unwrap();

        if n == 0 {
            break;
        }

        stream.write_all(&buf[..n]).unwrap();

        println!(">>> Echoed {n} bytes");
    }

    drop(stream);

    stack.join();
}
