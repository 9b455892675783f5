use nds_core::core::machine::Machine;
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::mouse::MouseButton;

use crate::audio::{self, AudioRing};
use crate::input::KeyMap;
use crate::overlay;
use crate::video::Video;

pub fn run(machine: &mut dyn Machine, key_map: &KeyMap, scale: u32) {
    let sdl_context = sdl2::init().expect("Failed to initialize SDL2");
    let sdl_video = sdl_context.video().expect("Failed to init SDL video");
    let sdl_audio = sdl_context.audio().expect("Failed to init SDL audio");

    let (width, height) = machine.display_size();
    let mut video = Video::new(&sdl_video, "NDS Emulator", width, height, scale);
    let mut event_pump = sdl_context.event_pump().expect("Failed to get event pump");

    let audio = audio::init(&sdl_audio, 32768);
    if let Some((device, _, _)) = &audio {
        device.resume();
    }
    let ring: Option<AudioRing> = audio.as_ref().map(|(_, ring, _)| ring.clone());

    let buffer_size = (width * height * 3) as usize;
    let mut framebuffer = vec![0u8; buffer_size];

    // Touch screen occupies the bottom half of the combined framebuffer.
    let touch_y_offset = height / 2;

    let mut frame_count: u32 = 0;
    let mut fps_timer = std::time::Instant::now();
    let mut fps_text = String::new();

    'main: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'main,

                Event::KeyDown {
                    scancode: Some(Scancode::Escape),
                    ..
                } => break 'main,

                Event::KeyDown {
                    scancode: Some(sc),
                    repeat: false,
                    ..
                } => {
                    if let Some(button_id) = key_map.get(sc) {
                        machine.set_input(button_id, true);
                    }
                }

                Event::KeyUp {
                    scancode: Some(sc), ..
                } => {
                    if let Some(button_id) = key_map.get(sc) {
                        machine.set_input(button_id, false);
                    }
                }

                Event::MouseButtonDown {
                    mouse_btn: MouseButton::Left,
                    x,
                    y,
                    ..
                } => {
                    set_touch_from_window(machine, x, y, width, scale, touch_y_offset);
                }

                Event::MouseMotion {
                    mousestate, x, y, ..
                } if mousestate.left() => {
                    set_touch_from_window(machine, x, y, width, scale, touch_y_offset);
                }

                Event::MouseButtonUp {
                    mouse_btn: MouseButton::Left,
                    ..
                } => {
                    machine.set_touch(false, 0, 0);
                }

                _ => {}
            }
        }

        machine.run_frame();

        machine.render_frame(&mut framebuffer);

        frame_count += 1;
        let elapsed = fps_timer.elapsed();
        if elapsed.as_secs_f32() >= 1.0 {
            fps_text = format!("{:.1}", frame_count as f32 / elapsed.as_secs_f32());
            frame_count = 0;
            fps_timer = std::time::Instant::now();
        }
        if !fps_text.is_empty() {
            overlay::draw_fps(&mut framebuffer, width as usize, &fps_text);
        }

        video.present(&framebuffer);

        if let Some(ring) = &ring {
            let mut buf = ring.lock().unwrap();
            buf.extend(machine.audio_samples());
        }
    }

    if let Some((_, _, fade_out)) = &audio {
        fade_out.store(true, std::sync::atomic::Ordering::Relaxed);
        std::thread::sleep(audio::fade_out_duration());
    }
}

/// Translate a window-space click into touchscreen coordinates, ignoring
/// clicks on the top (non-touch) half of the combined display.
fn set_touch_from_window(
    machine: &mut dyn Machine,
    win_x: i32,
    win_y: i32,
    native_width: u32,
    scale: u32,
    touch_y_offset: u32,
) {
    let px = (win_x / scale as i32).clamp(0, native_width as i32 - 1) as u32;
    let py_total = (win_y / scale as i32).max(0) as u32;

    if py_total < touch_y_offset {
        return;
    }

    let py = py_total - touch_y_offset;
    machine.set_touch(true, px as u16, py as u16);
}
