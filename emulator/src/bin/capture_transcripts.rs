use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{BatteryProfile, Session};

fn main() -> io::Result<()> {
    record_profile(BatteryProfile::Healthy)?;
    record_profile(BatteryProfile::Worn)?;
    Ok(())
}

fn record_profile(profile: BatteryProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    match profile {
        BatteryProfile::Healthy => record_healthy(&mut session),
        BatteryProfile::Worn => record_worn(&mut session),
    }
}

fn record_healthy(session: &mut Session) -> io::Result<()> {
    let _ = session.handle_command("status")?;
    let _ = session.handle_command("enable 1000")?;
    let _ = session.handle_command("attach")?;
    let _ = session.handle_command("tick 5")?;
    let _ = session.handle_command("history")?;
    let _ = session.handle_command("disable")?;
    Ok(())
}

fn record_worn(session: &mut Session) -> io::Result<()> {
    let _ = session.handle_command("enable 1000")?;
    let _ = session.handle_command("drain 60")?;
    let _ = session.handle_command("tick 6")?;
    let _ = session.handle_command("status")?;
    let _ = session.handle_command("history")?;
    let _ = session.handle_command("disable")?;
    Ok(())
}
