//! SDL2 pilot console
//! Owns the window that receives keyboard focus and, when enabled, shows the
//! latest frame as a local preview. Must live on the thread that created it.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::{debug, info, warn};

use super::{InputEvent, InputSource, Key};
use crate::capture::{decoder, Frame};
use crate::pipeline::FrameBox;

pub struct SdlConsole {
    _sdl: sdl2::Sdl,
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    preview: Option<Arc<FrameBox>>,
    last_presented: Option<u64>,
}

impl SdlConsole {
    /// Open the console window. With `preview`, each poll also presents the
    /// newest frame from the box.
    pub fn new(width: u32, height: u32, preview: Option<Arc<FrameBox>>) -> Result<Self> {
        let sdl = sdl2::init().map_err(|e| eyre!(e))?;
        let video_subsystem = sdl.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("aerocast pilot", width, height)
            .position_centered()
            .build()?;

        let mut canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl.event_pump().map_err(|e| eyre!(e))?;

        canvas.set_draw_color(sdl2::pixels::Color::RGB(0, 0, 200));
        canvas.clear();
        canvas.present();

        info!("Pilot console open ({}x{})", width, height);
        Ok(Self {
            _sdl: sdl,
            canvas,
            texture_creator,
            event_pump,
            preview,
            last_presented: None,
        })
    }

    fn render_frame(&mut self, frame: &Frame) -> Result<()> {
        let rgb_data = decoder::decode_frame(frame)?;
        let (width, height) = (frame.meta.width, frame.meta.height);

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &rgb_data, (width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }

    fn present_latest(&mut self) {
        let Some(frame) = self.preview.as_ref().and_then(|frames| frames.snapshot()) else {
            return;
        };
        if self.last_presented == Some(frame.meta.sequence) {
            return;
        }
        self.last_presented = Some(frame.meta.sequence);
        if let Err(e) = self.render_frame(&frame) {
            warn!("Preview render failed: {}", e);
        }
    }
}

fn map_scancode(scancode: Scancode) -> Key {
    match scancode {
        Scancode::Up => Key::Up,
        Scancode::Down => Key::Down,
        Scancode::Left => Key::Left,
        Scancode::Right => Key::Right,
        Scancode::W => Key::W,
        Scancode::S => Key::S,
        Scancode::A => Key::A,
        Scancode::D => Key::D,
        Scancode::T => Key::T,
        Scancode::L => Key::L,
        Scancode::Y => Key::Y,
        Scancode::B => Key::B,
        Scancode::Escape => Key::Escape,
        _ => Key::Other,
    }
}

impl InputSource for SdlConsole {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        let events: Vec<InputEvent> = self
            .event_pump
            .poll_iter()
            .filter_map(|event| match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    Some(InputEvent::Quit)
                }
                // OS auto-repeat is not a new press
                Event::KeyDown { repeat: true, .. } => None,
                Event::KeyDown {
                    scancode: Some(scancode),
                    ..
                } => Some(InputEvent::KeyDown(map_scancode(scancode))),
                Event::KeyUp {
                    scancode: Some(scancode),
                    ..
                } => Some(InputEvent::KeyUp(map_scancode(scancode))),
                _ => None,
            })
            .collect();

        if !events.is_empty() {
            debug!("Input: {:?}", events);
        }

        self.present_latest();
        events
    }
}
