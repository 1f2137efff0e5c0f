//SPDX-License-Identifier: MPL-2.0
/*!
Window placement types.

Values are in native pixels, as handed to the binding layer.
*/

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    x: i32,
    y: i32,
}
impl Position {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Position {
        Position { x, y }
    }

    #[inline] pub const fn x(&self) -> i32 { self.x }
    #[inline] pub const fn y(&self) -> i32 { self.y }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    width: u32,
    height: u32,
}

impl Size {
    #[inline] pub const fn new(width: u32, height: u32) -> Size {
        Size { width, height }
    }

    #[inline] pub const fn width(&self) -> u32 { self.width }
    #[inline] pub const fn height(&self) -> u32 { self.height }
}

impl Default for Size {
    fn default() -> Self {
        Size::new(640, 480)
    }
}

/**
Everything the binding layer needs to bring up one native window.

A `None` position means "let the backend decide".
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub position: Option<Position>,
    pub size: Size,
    pub fullscreen: bool,
}

impl WindowSpec {
    pub fn windowed(title: impl Into<String>, size: Size, position: Option<Position>) -> Self {
        WindowSpec {
            title: title.into(),
            position,
            size,
            fullscreen: false,
        }
    }

    pub fn fullscreen(title: impl Into<String>, size: Size) -> Self {
        WindowSpec {
            title: title.into(),
            position: None,
            size,
            fullscreen: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_size_matches_classic_video_mode() {
        let s = Size::default();
        assert_eq!((s.width(), s.height()), (640, 480));
    }

    #[test]
    fn fullscreen_spec_has_no_position() {
        let spec = WindowSpec::fullscreen("full", Size::new(1920, 1080));
        assert!(spec.fullscreen);
        assert_eq!(spec.position, None);
        assert_eq!(spec.size.width(), 1920);
    }
}
