//! Basic usage example for the esb-bridge wire formats.

use bytes::{BufMut, BytesMut};
use esb_wire::{
    Address, BridgeAnswer, BridgeRequest, Command, Frame, FrameDecoder, ListenFilter,
    RadioMessage, FRAME_SIZE,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== ESB Bridge Wire Example ===\n");

    // 1. Build a transfer request frame for the peripheral
    println!("1. Encoding a TRANSFER frame...");
    let address: Address = "6f:6f:6f:6f:01".parse()?;
    let msg = RadioMessage::new(address, 0x10, vec![0xAA, 0xBB])?;
    let frame = Frame::new(Command::Transfer.as_u8(), msg.encode_addressed()?)?;
    let frame_bytes = frame.encode()?;
    println!("   Encoded frame size: {} bytes", frame_bytes.len());
    assert_eq!(frame_bytes.len(), FRAME_SIZE);

    // 2. Decode it again from a noisy stream
    println!("\n2. Decoding from a stream with leading noise...");
    let mut buf = BytesMut::new();
    buf.put_slice(&[0x00, 0xFF]);
    buf.put_slice(&frame_bytes);

    let mut decoder = FrameDecoder::new();
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(decoded)) => {
                println!("   Command: 0x{:02x}", decoded.command);
                println!("   Payload: {:02x?}", decoded.payload.as_ref());
            }
            Ok(None) => break,
            Err(e) => println!("   Skipped bytes: {}", e),
        }
    }

    // 3. Bridge protocol packets
    println!("\n3. Bridge protocol packets...");
    let request = BridgeRequest::transfer(&msg)?.encode()?;
    println!("   Transfer request: {:02x?}", request.as_ref());

    let register = BridgeRequest::register_listener(&ListenFilter::any()).encode()?;
    println!("   Register listener: {:02x?}", register.as_ref());

    let notification = BridgeAnswer::notification(&msg)?.encode()?;
    println!("   Notification: {:02x?}", notification.as_ref());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
