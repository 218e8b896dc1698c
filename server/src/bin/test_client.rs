use pose_shared::{
    encode_frame, encode_handshake, encode_update, FrameDecoder, DEFAULT_PORT, PROTOCOL_VERSION,
    SPECTATOR_REQUEST,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

// Reads until one complete reply has arrived
async fn read_reply(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut buf = [0u8; 4096];
    loop {
        let len = timeout(Duration::from_secs(5), stream.read(&mut buf)).await??;
        if len == 0 {
            return Err("server closed the connection".into());
        }
        if let Some(frame) = decoder.push(&buf[..len])?.into_iter().next() {
            return Ok(frame);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr: SocketAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
    };

    println!("Connecting to {}", server_addr);
    let mut stream = TcpStream::connect(server_addr).await?;
    stream.set_nodelay(true)?;
    let mut decoder = FrameDecoder::new();

    stream
        .write_all(&encode_handshake(PROTOCOL_VERSION, "SmokeTest"))
        .await?;
    let reply = read_reply(&mut stream, &mut decoder).await?;
    println!("Handshake: {}", String::from_utf8_lossy(&reply));

    for step in 0..5u32 {
        let hip = format!("0,{},0,0,0,0,1", step);
        let update = encode_update(
            b"SmokeTest",
            &[(&b"hip"[..], hip.as_bytes()), (&b"head"[..], &b"0,1.7,0,0,0,0,1"[..])],
        );
        stream.write_all(&update).await?;

        let reply = read_reply(&mut stream, &mut decoder).await?;
        println!("Update {}: {}", step, String::from_utf8_lossy(&reply));

        sleep(Duration::from_millis(100)).await;
    }

    stream.write_all(&encode_frame(SPECTATOR_REQUEST)).await?;
    let reply = read_reply(&mut stream, &mut decoder).await?;
    println!("Spectate: {}", String::from_utf8_lossy(&reply));

    println!("Smoke test complete");
    Ok(())
}
