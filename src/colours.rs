use serde::{Deserialize, Deserializer, Serialize};

/// RGB colour with components normalised to 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Colour {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Colour {
    pub fn from_rgb8(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red: red as f64 / 255.0,
            green: green as f64 / 255.0,
            blue: blue as f64 / 255.0,
        }
    }

    /// Look up an X11-style colour name, ignoring case and spaces
    pub fn named(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        COLOUR_NAMES
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|(_, (r, g, b))| Colour::from_rgb8(*r, *g, *b))
    }
}

// Subset of rgb.txt used by the session definitions
const COLOUR_NAMES: &[(&str, (u8, u8, u8))] = &[
    ("white", (255, 255, 255)),
    ("black", (0, 0, 0)),
    ("grey", (190, 190, 190)),
    ("gray", (190, 190, 190)),
    ("lightgrey", (211, 211, 211)),
    ("red", (255, 0, 0)),
    ("darkred", (139, 0, 0)),
    ("orangered", (255, 69, 0)),
    ("orange", (255, 165, 0)),
    ("darkorange", (255, 140, 0)),
    ("gold", (255, 215, 0)),
    ("yellow", (255, 255, 0)),
    ("lightyellow", (255, 255, 224)),
    ("green", (0, 255, 0)),
    ("darkgreen", (0, 100, 0)),
    ("lightgreen", (144, 238, 144)),
    ("forestgreen", (34, 139, 34)),
    ("limegreen", (50, 205, 50)),
    ("cyan", (0, 255, 255)),
    ("blue", (0, 0, 255)),
    ("lightblue", (173, 216, 230)),
    ("skyblue", (135, 206, 235)),
    ("royalblue", (65, 105, 225)),
    ("navy", (0, 0, 128)),
    ("purple", (160, 32, 240)),
    ("magenta", (255, 0, 255)),
    ("violet", (238, 130, 238)),
    ("pink", (255, 192, 203)),
    ("hotpink", (255, 105, 180)),
    ("brown", (165, 42, 42)),
];

#[derive(Deserialize)]
#[serde(untagged)]
enum RawColour {
    Name(String),
    Rgb([f64; 3]),
}

impl<'de> Deserialize<'de> for Colour {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawColour::deserialize(deserializer)? {
            RawColour::Name(name) => Colour::named(&name).ok_or_else(|| {
                serde::de::Error::custom(format!("unrecognised colour name: {}", name))
            }),
            RawColour::Rgb([r, g, b]) => {
                for component in [r, g, b] {
                    if !(0.0..=255.0).contains(&component) {
                        return Err(serde::de::Error::custom(format!(
                            "colour component out of range: {}",
                            component
                        )));
                    }
                }
                Ok(Colour {
                    red: r / 255.0,
                    green: g / 255.0,
                    blue: b / 255.0,
                })
            }
        }
    }
}
