use clap::Parser;

const ASCII_LOGO: &str = r#"
                                 __  __  __ _   _____
                                |  \/  |/ _| | /  ___|
                                | .  . | |_| |_\ `--.  ___ ___  _ __   ___
                                | |\/| |  _| __|`--. \/ __/ _ \| '_ \ / _ \
                                | |  | | | | |_/\__/ / (_| (_) | |_) |  __/
                                \_|  |_|_|  \__\____/ \___\___/| .__/ \___|
                                                               | |
                                                               |_|
"#;

const EXAMPLES: &str = r#"
ПРИМЕРЫ ИСПОЛЬЗОВАНИЯ:

  1. ОБХОД (walk)
     Пройти MFT тома из образа и напечатать геометрию со сводкой:
     mftscope disk.img

  2. ЭКСПОРТ В JSONL
     Выгрузить записи MFT в формат JSONL (1 строка - 1 объект):
     mftscope disk.img --out-json report.jsonl

     Или коротко:
     mftscope disk.img -j report.jsonl

  3. С СОДЕРЖИМЫМ РЕЗИДЕНТНЫХ $DATA
     mftscope disk.img -j report.jsonl --data

  4. ПЕРВЫЕ N ЗАПИСЕЙ
     mftscope disk.img -j head.jsonl -n 1024
"#;

#[derive(Parser, Debug)]
#[command(name = "MftScope")]
#[command(version = "1.0")]
#[command(before_help = ASCII_LOGO)] // Вставляем логотип НАД меню
#[command(about = "Read-only парсер NTFS: boot-сектор, MFT, атрибуты, runlist'ы")]
#[command(after_help = EXAMPLES)]    // Вставляем примеры ПОД меню
pub struct Cli {
    /// Устройство или образ с NTFS-томом от нулевого смещения
    pub image: String,

    /// Путь к итоговому JSONL (1 строка - 1 запись MFT)
    #[arg(short = 'j', long)]
    pub out_json: Option<String>,

    /// Обработать не более N записей
    #[arg(short = 'n', long)]
    pub limit: Option<u64>,

    /// Включать ли содержимое $DATA для резидентных файлов
    #[arg(short, long)]
    pub data: bool,
}
