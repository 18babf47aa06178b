use serde::{Deserialize, Serialize};

// 文件分类，根据文件扩展名推断
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Video,
    Audio,
    Image,
    Document,
    Archive,
    Software,
    #[default]
    Other,
}

const CATEGORY_TABLE: [(Category, &[&str]); 6] = [
    (Category::Video, &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"]),
    (Category::Audio, &["mp3", "wav", "flac", "aac", "ogg", "wma", "m4a"]),
    (Category::Image, &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp"]),
    (Category::Document, &["pdf", "doc", "docx", "txt", "rtf", "odt"]),
    (Category::Archive, &["zip", "rar", "7z", "tar", "gz", "bz2"]),
    (Category::Software, &["exe", "msi", "deb", "rpm", "dmg", "pkg"]),
];

impl Category {
    pub fn from_file_name(file_name: &str) -> Self {
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return Category::Other;
        };
        let ext = ext.to_ascii_lowercase();

        CATEGORY_TABLE
            .iter()
            .find(|(_, extensions)| extensions.contains(&ext.as_str()))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Image => "image",
            Category::Document => "document",
            Category::Archive => "archive",
            Category::Software => "software",
            Category::Other => "other",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(Category::Video),
            "audio" => Ok(Category::Audio),
            "image" => Ok(Category::Image),
            "document" => Ok(Category::Document),
            "archive" => Ok(Category::Archive),
            "software" => Ok(Category::Software),
            "other" => Ok(Category::Other),
            other => Err(format!("未知的分类: {}", other)),
        }
    }
}
