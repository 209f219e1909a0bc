use smart_vision::system::{SmartVision, VisionOptions};

fn main() -> anyhow::Result<()> {
    smart_vision::init_logger!();

    let system = SmartVision::open(
        VisionOptions::default()
            .detect_emotion(true)
            .detect_hands(true),
    )?;

    println!("Press 'a' to exit.");
    system.run()?;
    Ok(())
}
