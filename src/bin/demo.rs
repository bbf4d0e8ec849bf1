//! ILC Modbus Demo
//!
//! Walks through the library without any hardware attached:
//! - building request frames (unicast and broadcast)
//! - inspecting the FIFO words a frame compiles to
//! - feeding a simulated response back through the dispatcher
//!
//! Usage: cargo run --bin demo

use ilc_modbus::{
    FifoBuffer, Ilc, IlcMode, IlcProcessor, IlcResult, ServerId,
};

struct Console;

impl IlcProcessor for Console {
    fn process_server_id(&mut self, address: u8, server_id: ServerId) {
        println!(
            "  unit {address}: uid {:012X}, firmware '{}' v{}.{}",
            server_id.unique_id,
            server_id.firmware_name,
            server_id.major_rev,
            server_id.minor_rev
        );
    }

    fn process_server_status(&mut self, address: u8, mode: IlcMode, status: u16, faults: u16) {
        println!("  unit {address}: mode {mode}, status 0x{status:04X}, faults 0x{faults:04X}");
    }

    fn process_change_ilc_mode(&mut self, address: u8, mode: IlcMode) {
        println!("  unit {address}: now in {mode}");
    }

    fn process_set_temp_ilc_address(&mut self, address: u8, new_address: u8) {
        println!("  unit {address}: assigned bus address {new_address}");
    }

    fn process_reset_server(&mut self, address: u8) {
        println!("  unit {address}: reset acknowledged");
    }
}

fn main() -> IlcResult<()> {
    println!("ILC Modbus Demo");
    println!("===============");
    println!("{}\n", ilc_modbus::info());

    let mut ilc = Ilc::new(Console);

    // =========================================================================
    // Part 1: Request frames
    // =========================================================================
    println!("Part 1: Request frames");
    println!("----------------------");

    ilc.report_server_status(5);
    println!("  report_server_status(5) compiled to {} FIFO words:", ilc.buffer().len());
    print!("   ");
    for word in ilc.buffer().words() {
        print!(" {word:04X}");
    }
    println!("\n");
    ilc.clear(false);

    // =========================================================================
    // Part 2: Broadcast with rolling counter
    // =========================================================================
    println!("Part 2: Broadcast frame");
    println!("-----------------------");

    let counter = ilc.next_broadcast_counter();
    ilc.broadcast_function(250, 66, counter, 500, &[0u8; 4]);
    println!(
        "  broadcast to 250 with counter {counter}: {} words, ledger stays empty\n",
        ilc.buffer().len()
    );
    ilc.clear(false);

    // =========================================================================
    // Part 3: Response dispatch
    // =========================================================================
    println!("Part 3: Response dispatch");
    println!("-------------------------");

    ilc.report_server_status(5);
    ilc.clear(true); // pretend the FPGA transmitted the request

    // simulate the unit's reply
    let mut response = FifoBuffer::new();
    response.write::<u8>(5);
    response.write::<u8>(18);
    response.write::<u8>(IlcMode::Enabled as u8);
    response.write::<u16>(0x0040);
    response.write::<u16>(0x0000);
    response.write_crc();

    ilc.process_response(response.words())?;
    ilc.check_commanded_empty()?;

    // the identical reply again - change gating drops the event
    ilc.report_server_status(5);
    ilc.clear(true);
    ilc.process_response(response.words())?;
    println!("  (identical second reply suppressed by the change cache)");

    println!("\nDemo completed.");
    Ok(())
}
