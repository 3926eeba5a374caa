use flipbook_engine::{
    render::backends::null::{NullGraphics, NullStats},
    render::Viewport,
    ConfigUpdate, EventCallbacks, FlipbookConfig, FlipbookError, FlipbookEvent, Flipbook, MediaSource,
    MountPoint, SettingsPatch,
};
use image::{Rgba, RgbaImage};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), FlipbookError> {
    env_logger::init();

    // Write a handful of page scans to disk so the default image loader has something to
    // decode. A real host would point the media source at its own files or URLs.
    let dir = tempfile::tempdir().map_err(anyhow::Error::from)?;
    let mut locators = Vec::new();
    for i in 0..5u8 {
        let path = dir.path().join(format!("page-{i}.png"));
        RgbaImage::from_pixel(120, 160, Rgba([40 * i, 90, 200 - 30 * i, 255]))
            .save(&path)
            .map_err(anyhow::Error::from)?;
        locators.push(path.display().to_string());
    }

    // The mount point is the rendering target. Giving it a graphics provider enables the
    // scene-graph engine; the null provider draws nothing but counts everything.
    let graphics = Arc::new(NullGraphics::new());
    let stats = graphics.stats();
    let mount = MountPoint::with_graphics(Viewport::new(0, 0, 1024, 768), graphics);

    let callbacks = EventCallbacks::new()
        .on_load_progress(|p| println!("loading: {}/{}", p.loaded, p.total))
        .on_page_change(|info| println!("now on page {} of {}", info.index + 1, info.total))
        .on_error(|msg| eprintln!("flipbook error: {msg}"));

    let settings = SettingsPatch::default()
        .animation_duration(400)
        .background_color("#202020")
        .navigation(|n| n.touch = Some(false));

    let book = Flipbook::new(
        FlipbookConfig::new()
            .mount(mount.clone())
            .media(MediaSource::images(locators).with_alt_text("demo scans"))
            .settings(settings)
            .callbacks(callbacks),
    )?;

    // All events also go out on a broadcast channel. Only events sent from this point on
    // are received.
    let mut event_rx = book.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            if matches!(event, FlipbookEvent::LoadProgress(_)) {
                continue;
            }
            println!("[event] {}", event);
        }
    });

    book.ready().await?;
    println!("ready with {} spreads using the {} engine", book.spreads().len(), book.render_mode());

    book.next_page().await;
    book.next_page().await;
    book.prev_page().await;
    book.go_to_page(4).await;

    // Input arrives through the mount point, as a host's window system would deliver it
    mount.dispatch(flipbook_engine::InputEvent::Key(flipbook_engine::Key::ArrowLeft));
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    mount.set_size(1280, 720);

    // Switching backends replaces the engine on the same mount point
    book.update_config(ConfigUpdate::settings(
        SettingsPatch::default().render_mode(flipbook_engine::RenderMode::Layered),
    ))?;
    book.ready().await?;
    println!("switched to the {} engine", book.render_mode());
    book.next_page().await;

    book.destroy();
    println!(
        "frames rendered: {}, graphics resources still alive: {}",
        NullStats::get(&stats.frames_rendered),
        stats.live_resources()
    );

    Ok(())
}
