//! In-process loopback demo — a scripted modem on a datagram pair.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The "modem" thread answers the allocate-CID exchange, then echoes one
//! data frame back to the session it came from.

use std::io::{Read, Write};
use std::os::unix::net::UnixDatagram;
use std::time::Duration;

use qmimux_engine::Mux;
use qmimux_frame::{decode_frame, ControlHeader, QMUX_FLAG_RESPONSE};

struct DatagramChannel(UnixDatagram);

impl Read for DatagramChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.recv(buf)
    }
}

impl Write for DatagramChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.send(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn reply_wire(ctrl_flags: u8, service: u8, client: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![0x01];
    wire.extend_from_slice(&((payload.len() + 5) as u16).to_le_bytes());
    wire.push(ctrl_flags);
    wire.push(service);
    wire.push(client);
    wire.extend_from_slice(payload);
    wire
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (near, far) = UnixDatagram::pair()?;

    // Scripted modem.
    let modem = std::thread::spawn(move || -> std::io::Result<()> {
        let mut buf = [0u8; 4096];

        // Allocate-CID request -> assign cid 9.
        let n = far.recv(&mut buf)?;
        let frame = decode_frame(&buf[..n]).expect("decode alloc request");
        let (header, block) = ControlHeader::decode(&frame.payload).expect("control header");
        let service = block[3];
        eprintln!("modem: alloc request msg={:#06x} service={service}", header.message);

        let mut payload = vec![0x01, 0x01]; // response flags, tid
        payload.extend_from_slice(&header.message.to_le_bytes());
        payload.extend_from_slice(&12u16.to_le_bytes());
        payload.extend_from_slice(&[0x02, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]); // status ok
        payload.extend_from_slice(&[0x01, 0x02, 0x00, service, 9]); // cid 9
        far.send(&reply_wire(QMUX_FLAG_RESPONSE, 0, 0, &payload))?;

        // Echo one data frame.
        let n = far.recv(&mut buf)?;
        let frame = decode_frame(&buf[..n]).expect("decode data frame");
        eprintln!(
            "modem: echoing {} bytes for {}:{}",
            frame.payload.len(),
            frame.service,
            frame.client
        );
        let mut echo = vec![0x00];
        echo.extend_from_slice(&frame.payload);
        far.send(&reply_wire(QMUX_FLAG_RESPONSE, frame.service, frame.client, &echo))?;
        Ok(())
    });

    let mux = Mux::new(DatagramChannel(near.try_clone()?), DatagramChannel(near))?;
    let session = mux.open();

    let cid = mux.get_service_cid(&session, 2)?;
    eprintln!("host: bound to service 2, cid {cid}");

    // Drop the broadcast copy of our own allocate reply.
    while session.pending() > 0 {
        let _ = session.recv()?;
    }

    mux.send(&session, b"hello modem")?;
    let frame = session.recv_timeout(Duration::from_secs(1))?;
    eprintln!("host: got {} byte echo", frame.payload.len());

    modem.join().expect("modem thread")?;
    mux.shutdown();
    Ok(())
}
