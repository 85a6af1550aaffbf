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
        "tun1",
        Ipv4Addr::from_str("10.10.10.11").unwrap(),
        Ipv4Addr::from_str("255.255.255.0").unwrap(),
    )
    .unwrap();

    println!(">>> Trying to connect to server...");
    let mut stream = stack
        .connect(Ipv4Addr::from_str("10.10.10.10").unwrap(), 9090)
        .unwrap();
    println!(">>> Connected!");

    stream.write_all(b"hi there").unwrap();
    stream.flush().unwrap();

    let mut buf = [0u8; 1500];
    let n = stream.read(&mut buf[..]).unwrap();
    println!(
        ">>> Read: {:?}",
        String::from_utf8_lossy(&buf[..n])
    );

    stream.close();
}
